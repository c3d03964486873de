//! Self-pipe descriptor that wakes the reactor from outside the loop.

use crate::descriptor::{Ctx, DescriptorCore, Eventable};
use crate::sys::RawIo;
use crate::Binding;

/// Read end of the reactor's self-pipe. Readable means another thread
/// queued work; the actual drain and dispatch live on the reactor side.
/// Emits no terminal event.
pub struct LoopbreakDescriptor {
    pub(crate) core: DescriptorCore,
}

impl LoopbreakDescriptor {
    pub(crate) fn new(io: Box<dyn RawIo>, binding: Binding, now: u64) -> LoopbreakDescriptor {
        let mut core = DescriptorCore::new(io, binding, now);
        core.callback_unbind = false;
        LoopbreakDescriptor { core }
    }
}

impl Eventable for LoopbreakDescriptor {
    fn on_readable(&mut self, ctx: &mut Ctx<'_>) {
        ctx.reactor.read_loop_breaker();
    }

    fn on_writable(&mut self, _ctx: &mut Ctx<'_>) {
        tracing::error!(binding = %self.core.binding, "writable event on the loopbreaker");
        debug_assert!(false, "writable event on the loopbreaker");
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
