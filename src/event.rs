/// Mouse action carried by [`Event::Mouse`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseAction {
    Down,
    Up,
    Move,
    Wheel,
}

/// Events delivered by the host toolkit, replayed as deferred events, or held
/// in the substitute queue's lookahead slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Key {
        code: u32,
        pressed: bool,
    },
    Mouse {
        x: i32,
        y: i32,
        button: u8,
        action: MouseAction,
    },
    Paint {
        x: i32,
        y: i32,
        width: u32,
        height: u32,
    },
    Focus {
        gained: bool,
    },
    Resize {
        width: u32,
        height: u32,
    },
    Close,
    Custom {
        code: u32,
        detail: String,
    },
}

/// Discriminant of [`Event`], used to register listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Key,
    Mouse,
    Paint,
    Focus,
    Resize,
    Close,
    Custom,
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Key { .. } => EventKind::Key,
            Event::Mouse { .. } => EventKind::Mouse,
            Event::Paint { .. } => EventKind::Paint,
            Event::Focus { .. } => EventKind::Focus,
            Event::Resize { .. } => EventKind::Resize,
            Event::Close => EventKind::Close,
            Event::Custom { .. } => EventKind::Custom,
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventKind::Key => write!(f, "key"),
            EventKind::Mouse => write!(f, "mouse"),
            EventKind::Paint => write!(f, "paint"),
            EventKind::Focus => write!(f, "focus"),
            EventKind::Resize => write!(f, "resize"),
            EventKind::Close => write!(f, "close"),
            EventKind::Custom => write!(f, "custom"),
        }
    }
}
