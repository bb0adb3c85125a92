//! PS/2 set-1 scancode queue (spec §4.13, §6.6): host key events are
//! translated through a static table and appended to a small ring buffer
//! the MMIO keyboard-data register dequeues from.

pub const QUEUE_CAPACITY: usize = 64;

/// Wait-free enough for a single-threaded host event loop: push drops the
/// oldest entry on overflow rather than blocking, since a full keyboard
/// buffer means the guest just isn't draining it.
pub struct ScancodeQueue {
    buf: [u8; QUEUE_CAPACITY],
    head: usize,
    len: usize,
}

impl ScancodeQueue {
    pub fn new() -> Self {
        Self { buf: [0; QUEUE_CAPACITY], head: 0, len: 0 }
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn push(&mut self, byte: u8) {
        let tail = (self.head + self.len) % QUEUE_CAPACITY;
        self.buf[tail] = byte;
        if self.len < QUEUE_CAPACITY {
            self.len += 1;
        } else {
            self.head = (self.head + 1) % QUEUE_CAPACITY; // drop oldest
        }
    }

    pub fn pop(&mut self) -> Option<u8> {
        if self.len == 0 {
            return None;
        }
        let byte = self.buf[self.head];
        self.head = (self.head + 1) % QUEUE_CAPACITY;
        self.len -= 1;
        Some(byte)
    }
}

impl Default for ScancodeQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Host-side key identity, independent of any particular windowing toolkit
/// (spec §6.6: "SDL key events are translated through a static scan-table").
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Key {
    Escape,
    Enter,
    Space,
    Backspace,
    Tab,
    Letter(u8), // 'a'..'z'
    Digit(u8),  // '0'..'9'
    ArrowUp,
    ArrowDown,
    ArrowLeft,
    ArrowRight,
    Pause,
}

/// Set 1 scancode for a key's "make" (press) code, plus whether it's an
/// extended key needing the `0xe0` prefix. `Pause` has no ordinary make/
/// break pair at all (handled specially in [`KeyboardController::key_event`]).
fn base_scancode(key: Key) -> (bool, u8) {
    match key {
        Key::Escape => (false, 0x01),
        Key::Enter => (false, 0x1c),
        Key::Space => (false, 0x39),
        Key::Backspace => (false, 0x0e),
        Key::Tab => (false, 0x0f),
        Key::Letter(c) => (false, letter_scancode(c)),
        Key::Digit(c) => (false, digit_scancode(c)),
        Key::ArrowUp => (true, 0x48),
        Key::ArrowDown => (true, 0x50),
        Key::ArrowLeft => (true, 0x4b),
        Key::ArrowRight => (true, 0x4d),
        Key::Pause => (false, 0), // unused
    }
}

fn letter_scancode(c: u8) -> u8 {
    const ROW: [u8; 26] = [
        0x1e, 0x30, 0x2e, 0x20, 0x12, 0x21, 0x22, 0x23, 0x17, 0x24, 0x25, 0x26, 0x32, 0x31, 0x18, 0x19, 0x10, 0x13,
        0x1f, 0x14, 0x16, 0x2f, 0x11, 0x2d, 0x15, 0x2c,
    ];
    ROW[(c - b'a') as usize]
}

fn digit_scancode(c: u8) -> u8 {
    const ROW: [u8; 10] = [0x0b, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a]; // '0'..'9'
    ROW[(c - b'0') as usize]
}

/// Debounces host key-repeat and expands [`Key`] presses/releases into the
/// prefix/code/release byte sequences PS/2 set 1 expects.
pub struct KeyboardController {
    pub queue: ScancodeQueue,
    last_key_down: Option<Key>,
}

impl KeyboardController {
    pub fn new() -> Self {
        Self { queue: ScancodeQueue::new(), last_key_down: None }
    }

    /// `Pause` is a fixed 8-byte sequence with no independent release code
    /// and is never suppressed as a repeat (spec §6.6).
    pub fn key_event(&mut self, key: Key, pressed: bool) {
        if key == Key::Pause {
            if pressed {
                for byte in [0xe1, 0x1d, 0x45, 0xe1, 0x9d, 0xc5] {
                    self.queue.push(byte);
                }
            }
            return;
        }

        if pressed {
            if self.last_key_down == Some(key) {
                return; // host key-repeat suppressed
            }
            self.last_key_down = Some(key);
        } else if self.last_key_down == Some(key) {
            self.last_key_down = None;
        }

        let (extended, code) = base_scancode(key);
        if extended {
            self.queue.push(0xe0);
        }
        self.queue.push(if pressed { code } else { code | 0x80 });
    }
}

impl Default for KeyboardController {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_buffer_drops_oldest_entry_once_full() {
        let mut q = ScancodeQueue::new();
        for i in 0..QUEUE_CAPACITY {
            q.push(i as u8);
        }
        q.push(0xaa);
        assert_eq!(q.pop(), Some(1), "entry 0 was dropped to make room");
        assert_eq!(q.len, QUEUE_CAPACITY - 1);
    }

    #[test]
    fn repeated_key_down_without_an_intervening_release_is_suppressed() {
        let mut kb = KeyboardController::new();
        kb.key_event(Key::Letter(b'a'), true);
        kb.key_event(Key::Letter(b'a'), true);
        assert_eq!(kb.queue.pop(), Some(letter_scancode(b'a')));
        assert_eq!(kb.queue.pop(), None);
    }

    #[test]
    fn release_ors_in_the_high_bit() {
        let mut kb = KeyboardController::new();
        kb.key_event(Key::Letter(b'a'), true);
        kb.key_event(Key::Letter(b'a'), false);
        assert_eq!(kb.queue.pop(), Some(letter_scancode(b'a')));
        assert_eq!(kb.queue.pop(), Some(letter_scancode(b'a') | 0x80));
    }

    #[test]
    fn extended_key_carries_the_0xe0_prefix_on_both_make_and_break() {
        let mut kb = KeyboardController::new();
        kb.key_event(Key::ArrowUp, true);
        kb.key_event(Key::ArrowUp, false);
        assert_eq!(kb.queue.pop(), Some(0xe0));
        assert_eq!(kb.queue.pop(), Some(0x48));
        assert_eq!(kb.queue.pop(), Some(0xe0));
        assert_eq!(kb.queue.pop(), Some(0xc8));
    }
}
