//! Structured trace events (SS4.13 of the expanded design). Every peripheral that fires one of
//! these also emits a matching `log` record, so the simulator is observable via `RUST_LOG` even
//! when the host hasn't installed a tracer callback.

/// A single traced event. Mirrors the payload shape of a C-style tracer callback
//  (`event, p1, p2, p3, p4`) as a closed Rust enum instead of a tagged union of integers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TracerEvent {
    /// One bit of a port's externally observable pin level changed.
    IoPortPin { port: u8, bit: u8, old: bool, new: bool },
    /// A port's DDR register changed.
    Ddr { port: u8, old: u8, new: u8 },
    /// An interrupt vector was dispatched.
    Interrupt { vector: usize },
}

/// Host-installable sink for `TracerEvent`s. The board always also logs at an appropriate level
/// regardless of whether a tracer is installed.
pub type TracerFn = Box<dyn FnMut(TracerEvent)>;

/// Emits `event` to `tracer` (if installed) and to the `log` facade.
pub fn emit(tracer: &mut Option<TracerFn>, event: TracerEvent) {
    match event {
        TracerEvent::IoPortPin { port, bit, old, new } => {
            log::trace!("port {} pin {} changed: {} -> {}", port, bit, old, new);
        }
        TracerEvent::Ddr { port, old, new } => {
            log::trace!("port {} DDR changed: {:#04x} -> {:#04x}", port, old, new);
        }
        TracerEvent::Interrupt { vector } => {
            log::debug!("interrupt vector {} dispatched", vector);
        }
    }
    if let Some(f) = tracer {
        f(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn emit_invokes_installed_tracer() {
        let seen: Rc<RefCell<Vec<TracerEvent>>> = Rc::new(RefCell::new(Vec::new()));
        let seen_clone = Rc::clone(&seen);
        let mut tracer: Option<TracerFn> = Some(Box::new(move |ev| seen_clone.borrow_mut().push(ev)));

        emit(&mut tracer, TracerEvent::Interrupt { vector: 3 });

        assert_eq!(seen.borrow().len(), 1);
        assert_eq!(seen.borrow()[0], TracerEvent::Interrupt { vector: 3 });
    }

    #[test]
    fn emit_without_tracer_does_not_panic() {
        let mut tracer: Option<TracerFn> = None;
        emit(&mut tracer, TracerEvent::Ddr { port: 1, old: 0, new: 0xFF });
    }
}
