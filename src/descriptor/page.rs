//! Outbound pages: owned byte chunks awaiting transmission.

use bytes::{BufMut, Bytes, BytesMut};
use std::collections::VecDeque;
use std::net::SocketAddr;

/// One queued chunk of outbound bytes.
///
/// The buffer owns its storage and always carries a trailing guard NUL
/// that is not part of the payload. Stream pages have no destination;
/// datagram pages each carry their own.
pub(crate) struct OutboundPage {
    // Payload plus one guard byte.
    buf: Bytes,
    // Payload bytes already written out.
    offset: usize,
    dest: Option<SocketAddr>,
}

impl OutboundPage {
    pub(crate) fn new(data: &[u8], dest: Option<SocketAddr>) -> OutboundPage {
        let mut buf = BytesMut::with_capacity(data.len() + 1);
        buf.put_slice(data);
        buf.put_u8(0);
        OutboundPage { buf: buf.freeze(), offset: 0, dest }
    }

    pub(crate) fn payload_len(&self) -> usize {
        self.buf.len() - 1
    }

    /// Unsent payload bytes.
    pub(crate) fn remaining(&self) -> usize {
        self.payload_len() - self.offset
    }

    /// The unsent tail of the payload.
    pub(crate) fn chunk(&self) -> &[u8] {
        &self.buf[self.offset..self.payload_len()]
    }

    pub(crate) fn advance(&mut self, n: usize) {
        debug_assert!(n <= self.remaining());
        self.offset += n;
    }

    pub(crate) fn dest(&self) -> Option<&SocketAddr> {
        self.dest.as_ref()
    }
}

/// FIFO of outbound pages with byte accounting.
///
/// `data_size` always equals the sum of `remaining()` over the queued
/// pages.
#[derive(Default)]
pub(crate) struct OutboundQueue {
    pages: VecDeque<OutboundPage>,
    size: u64,
}

impl OutboundQueue {
    pub(crate) fn push(&mut self, page: OutboundPage) {
        self.size += page.remaining() as u64;
        self.pages.push_back(page);
    }

    /// Total unsent bytes.
    pub(crate) fn data_size(&self) -> u64 {
        self.size
    }

    /// Queued page count. Drives datagram write interest: zero-length
    /// packets contribute no bytes but still need a send.
    pub(crate) fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub(crate) fn front(&self) -> Option<&OutboundPage> {
        self.pages.front()
    }

    /// Drops the head page, e.g. after a datagram send.
    pub(crate) fn pop_front(&mut self) {
        if let Some(page) = self.pages.pop_front() {
            self.size -= page.remaining() as u64;
        }
    }

    /// Advances past `n` sent bytes, freeing fully consumed pages.
    pub(crate) fn consume(&mut self, mut n: usize) {
        self.size -= n as u64;
        while n > 0 {
            let page = self.pages.front_mut().expect("consumed past queue end");
            let rem = page.remaining();
            if n >= rem {
                self.pages.pop_front();
                n -= rem;
            } else {
                page.advance(n);
                n = 0;
            }
        }
    }

    /// Up to `max` unsent chunks for a scatter-gather write.
    pub(crate) fn gather<'a>(&'a self, max: usize) -> impl Iterator<Item = &'a [u8]> {
        self.pages
            .iter()
            .take(max)
            .map(OutboundPage::chunk)
            .filter(|c| !c.is_empty())
    }

    pub(crate) fn clear(&mut self) {
        self.pages.clear();
        self.size = 0;
    }
}
