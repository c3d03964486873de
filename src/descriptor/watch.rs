//! Filesystem-events descriptor.

use crate::descriptor::{Ctx, DescriptorCore, Eventable};
use crate::sys::RawIo;
use crate::Binding;

/// Passive readable source over the kernel's filesystem-event handle
/// (inotify on Linux). Event decoding lives on the reactor side; this
/// descriptor only reports readiness. Emits no terminal event.
pub struct WatchDescriptor {
    pub(crate) core: DescriptorCore,
}

impl WatchDescriptor {
    pub(crate) fn new(io: Box<dyn RawIo>, binding: Binding, now: u64) -> WatchDescriptor {
        let mut core = DescriptorCore::new(io, binding, now);
        core.callback_unbind = false;
        WatchDescriptor { core }
    }
}

impl Eventable for WatchDescriptor {
    fn on_readable(&mut self, ctx: &mut Ctx<'_>) {
        ctx.reactor.read_watch_events();
    }

    fn on_writable(&mut self, _ctx: &mut Ctx<'_>) {
        tracing::error!(binding = %self.core.binding, "writable event on the watch descriptor");
        debug_assert!(false, "writable event on the watch descriptor");
    }

    fn on_error(&mut self, ctx: &mut Ctx<'_>) {
        self.core.schedule_close(false, ctx.reactor);
    }

    fn heartbeat(&mut self, _ctx: &mut Ctx<'_>) {}

    fn select_for_read(&self) -> bool {
        true
    }

    fn select_for_write(&self) -> bool {
        false
    }

    fn should_delete(&self) -> bool {
        self.core.should_delete()
    }
}
