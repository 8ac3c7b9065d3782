//! IRQ graph (SS4.2): the substrate peripherals use to expose signals -- port-bit changes,
//! interrupt triggers, LCD pin edges -- without knowing their consumers. The board harness wires
//! LEDs and the LCD to specific peripheral outputs by connecting nodes, not by editing peripheral
//! code.
//!
//! Listeners are a closed enumeration rather than boxed closures: a raise can itself be triggered
//! from inside a listener's effect (re-entrant raises are permitted by SS4.2), and a `Box<dyn
//! FnMut>` capturing `&mut Board` while being invoked from within `Board::raise` is exactly the
//! aliasing conflict the borrow checker exists to catch. `raise` instead returns the ordered list
//! of listener hits for the caller to apply.

/// Opaque handle into the node arena. Ids are assigned monotonically and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IrqHandle(pub u32);

bitflags::bitflags! {
    /// Per-node behavior flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct IrqFlags: u8 {
        /// Suppress propagation when `raise` is called with the same value as last time.
        const FILTER_CHANGES = 1 << 0;
        /// No downstream connections or listeners; raises are recorded but otherwise inert.
        const NOT_CONNECTED = 1 << 1;
    }
}

/// What a raised node does besides recording its new value. Board-level concerns (driving an
/// LED, latching an LCD pin, waking the interrupt controller) are named here as a closed set so
/// `Board::apply_irq_event` can match exhaustively instead of invoking an opaque callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Listener {
    /// Drive one bit of a port's externally-observed pin level.
    PortPin { port: u8, bit: u8 },
    /// A whole port's effective byte changed; carries the full byte as `value` on the event.
    PortByte(u8),
    /// A port's DDR register changed; carries the new DDR byte as `value` on the event.
    Ddr(u8),
    /// Forward a bit level to the PCD8544's serial receiver.
    LcdPin(crate::peripherals::lcd::LcdPin),
    /// Raise an interrupt vector by index.
    InterruptVector(usize),
    /// Forward a value to a button/keypad input line.
    Button(u8),
}

#[derive(Debug, Clone)]
struct IrqNode {
    name: &'static str,
    value: u32,
    flags: IrqFlags,
    listeners: Vec<Listener>,
    connections: Vec<IrqHandle>,
}

/// One listener firing or one node's value changing, produced by `raise` for the caller to act
/// on. `Board` walks these after the graph traversal completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IrqEvent {
    pub node: IrqHandle,
    pub listener: Listener,
    pub value: u32,
}

/// Arena of IRQ nodes addressed by `IrqHandle`. Not thread-safe: concurrent hosts must serialize
/// access externally, matching SS4.2.
#[derive(Debug, Clone, Default)]
pub struct IrqGraph {
    nodes: Vec<IrqNode>,
}

impl IrqGraph {
    pub fn new() -> Self {
        Self { nodes: Vec::new() }
    }

    /// Allocate a new node, returning a handle that is valid for the graph's lifetime.
    pub fn alloc(&mut self, name: &'static str, flags: IrqFlags) -> IrqHandle {
        let handle = IrqHandle(self.nodes.len() as u32);
        self.nodes.push(IrqNode {
            name,
            value: 0,
            flags,
            listeners: Vec::new(),
            connections: Vec::new(),
        });
        handle
    }

    pub fn name(&self, handle: IrqHandle) -> &'static str {
        self.nodes[handle.0 as usize].name
    }

    pub fn value(&self, handle: IrqHandle) -> u32 {
        self.nodes[handle.0 as usize].value
    }

    /// Append a listener to `handle`'s node.
    pub fn register_notify(&mut self, handle: IrqHandle, listener: Listener) {
        self.nodes[handle.0 as usize].listeners.push(listener);
    }

    /// Append `dst` to `src`'s downstream connection list.
    pub fn connect(&mut self, src: IrqHandle, dst: IrqHandle) {
        self.nodes[src.0 as usize].connections.push(dst);
    }

    /// Raise `handle` with `value`. Writes the new value unconditionally, then depth-first fires
    /// listeners and propagates to connections, honoring `FILTER_CHANGES`. Returns the ordered
    /// list of listener hits; the graph itself performs no board-level side effects.
    pub fn raise(&mut self, handle: IrqHandle, value: u32) -> Vec<IrqEvent> {
        let mut events = Vec::new();
        self.raise_inner(handle, value, &mut events);
        events
    }

    fn raise_inner(&mut self, handle: IrqHandle, value: u32, events: &mut Vec<IrqEvent>) {
        let node = &mut self.nodes[handle.0 as usize];
        let suppress = node.flags.contains(IrqFlags::FILTER_CHANGES) && node.value == value;
        node.value = value;
        if suppress {
            return;
        }

        for &listener in &self.nodes[handle.0 as usize].listeners {
            events.push(IrqEvent {
                node: handle,
                listener,
                value,
            });
        }

        let connections = self.nodes[handle.0 as usize].connections.clone();
        for dst in connections {
            self.raise_inner(dst, value, events);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raise_fires_listeners_in_order() {
        let mut g = IrqGraph::new();
        let n = g.alloc("test", IrqFlags::empty());
        g.register_notify(n, Listener::PortPin { port: 1, bit: 0 });
        g.register_notify(n, Listener::Button(3));

        let events = g.raise(n, 1);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].listener, Listener::PortPin { port: 1, bit: 0 });
        assert_eq!(events[1].listener, Listener::Button(3));
        assert_eq!(g.value(n), 1);
    }

    #[test]
    fn filter_changes_suppresses_repeat_raise() {
        let mut g = IrqGraph::new();
        let n = g.alloc("filtered", IrqFlags::FILTER_CHANGES);
        g.register_notify(n, Listener::Button(0));

        let first = g.raise(n, 5);
        assert_eq!(first.len(), 1);
        let second = g.raise(n, 5);
        assert!(second.is_empty());
        let third = g.raise(n, 6);
        assert_eq!(third.len(), 1);
    }

    #[test]
    fn propagation_is_depth_first_through_connections() {
        let mut g = IrqGraph::new();
        let src = g.alloc("src", IrqFlags::empty());
        let mid = g.alloc("mid", IrqFlags::empty());
        let leaf = g.alloc("leaf", IrqFlags::empty());
        g.connect(src, mid);
        g.connect(mid, leaf);
        g.register_notify(leaf, Listener::InterruptVector(7));

        let events = g.raise(src, 42);
        assert_eq!(events, vec![IrqEvent {
            node: leaf,
            listener: Listener::InterruptVector(7),
            value: 42,
        }]);
        assert_eq!(g.value(mid), 42);
        assert_eq!(g.value(leaf), 42);
    }

    #[test]
    fn not_connected_node_records_value_without_events() {
        let mut g = IrqGraph::new();
        let n = g.alloc("orphan", IrqFlags::NOT_CONNECTED);
        let events = g.raise(n, 9);
        assert!(events.is_empty());
        assert_eq!(g.value(n), 9);
    }
}
