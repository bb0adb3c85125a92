//! Host glue contract (spec §1, §6): the only part of the windowing/input
//! stack this repository treats as core is the boundary the interpreter's
//! VGA framebuffer and PS/2 scancode queue cross into a real window — a
//! `present(pixels, w, h)` callback, a `poll_events()` callback, and the
//! scancode enqueue path. An actual SDL/window-toolkit backend is a
//! collaborator and out of scope; this crate defines the trait and ships a
//! headless implementation that captures frames and replays a scripted
//! event queue, used by tests and by `-f` when no real window is wanted.

use nyuzi_device::scancode::Key;

/// One input event the host layer can observe. Translated into PS/2
/// scancodes by [`nyuzi_device::scancode::KeyboardController`] before it
/// reaches the emulator (spec §4.13, §6.6).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HostEvent {
    Key { key: Key, pressed: bool },
    Quit,
}

/// The collaborator contract (spec §1): `present` is handed the VGA
/// framebuffer's raw RGBA8888 bytes once per scan, `poll_events` is called
/// once per run-loop iteration to drain host input.
pub trait HostWindow {
    fn present(&mut self, pixels: &[u8], width: u32, height: u32);
    fn poll_events(&mut self) -> Vec<HostEvent>;
}

/// A window that presents nowhere and has no input: the default when `-f`
/// is not given.
#[derive(Default)]
pub struct NullWindow;

impl HostWindow for NullWindow {
    fn present(&mut self, _pixels: &[u8], _width: u32, _height: u32) {}
    fn poll_events(&mut self) -> Vec<HostEvent> {
        Vec::new()
    }
}

/// A headless host: `present` copies the frame into `last_frame` instead of
/// drawing it, and `poll_events` replays a scripted queue instead of
/// reading a real input device. Used by renderer/interpreter integration
/// tests and by `demos/` when run without a window.
#[derive(Default)]
pub struct CapturingWindow {
    pub last_frame: Vec<u8>,
    pub last_width: u32,
    pub last_height: u32,
    pub present_count: u64,
    scripted_events: std::collections::VecDeque<HostEvent>,
}

impl CapturingWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues events to be returned, in order, by future `poll_events`
    /// calls (one event dequeued per call, like a real host's event pump
    /// draining one message at a time).
    pub fn script(&mut self, events: impl IntoIterator<Item = HostEvent>) {
        self.scripted_events.extend(events);
    }
}

impl HostWindow for CapturingWindow {
    fn present(&mut self, pixels: &[u8], width: u32, height: u32) {
        self.last_frame.clear();
        self.last_frame.extend_from_slice(pixels);
        self.last_width = width;
        self.last_height = height;
        self.present_count += 1;
    }

    fn poll_events(&mut self) -> Vec<HostEvent> {
        self.scripted_events.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capturing_window_stores_the_most_recent_frame() {
        let mut win = CapturingWindow::new();
        win.present(&[1, 2, 3, 4], 1, 1);
        assert_eq!(win.last_frame, vec![1, 2, 3, 4]);
        assert_eq!(win.present_count, 1);
    }

    #[test]
    fn scripted_events_drain_in_order() {
        let mut win = CapturingWindow::new();
        win.script([HostEvent::Key { key: Key::Letter(b'a'), pressed: true }, HostEvent::Quit]);
        let events = win.poll_events();
        assert_eq!(events, vec![HostEvent::Key { key: Key::Letter(b'a'), pressed: true }, HostEvent::Quit]);
        assert!(win.poll_events().is_empty());
    }

    #[test]
    fn null_window_presents_and_polls_nothing() {
        let mut win = NullWindow;
        win.present(&[0; 16], 2, 2);
        assert!(win.poll_events().is_empty());
    }
}
