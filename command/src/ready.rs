use std::{fmt, ops};

/// A compact set of readiness flags, used both for the events a socket
/// reported and for the events a session is interested in
#[derive(Copy, PartialEq, Eq, Clone, PartialOrd, Ord, Hash, Default)]
pub struct Ready(pub u16);

const READABLE: u16 = 0b00001;
const WRITABLE: u16 = 0b00010;
const ERROR: u16 = 0b00100;
const HUP: u16 = 0b01000;

impl Ready {
    pub const EMPTY: Ready = Ready(0);
    pub const READABLE: Ready = Ready(READABLE);
    pub const WRITABLE: Ready = Ready(WRITABLE);
    pub const ERROR: Ready = Ready(ERROR);
    pub const HUP: Ready = Ready(HUP);
    pub const ALL: Ready = Ready(READABLE | WRITABLE | ERROR | HUP);

    #[inline]
    pub fn is_empty(&self) -> bool {
        *self == Ready::EMPTY
    }

    #[inline]
    pub fn is_readable(&self) -> bool {
        self.contains(Ready::READABLE)
    }

    #[inline]
    pub fn is_writable(&self) -> bool {
        self.contains(Ready::WRITABLE)
    }

    #[inline]
    pub fn is_error(&self) -> bool {
        self.contains(Ready::ERROR)
    }

    #[inline]
    pub fn is_hup(&self) -> bool {
        self.contains(Ready::HUP)
    }

    #[inline]
    pub fn insert<T: Into<Self>>(&mut self, other: T) {
        let other = other.into();
        self.0 |= other.0;
    }

    #[inline]
    pub fn remove<T: Into<Self>>(&mut self, other: T) {
        let other = other.into();
        self.0 &= !other.0;
    }

    #[inline]
    pub fn contains<T: Into<Self>>(&self, other: T) -> bool {
        let other = other.into();
        (*self & other) == other
    }
}

impl ops::BitOr for Ready {
    type Output = Ready;

    #[inline]
    fn bitor(self, other: Ready) -> Ready {
        Ready(self.0 | other.0)
    }
}

impl ops::BitOrAssign for Ready {
    #[inline]
    fn bitor_assign(&mut self, other: Ready) {
        self.0 |= other.0;
    }
}

impl ops::BitAnd for Ready {
    type Output = Ready;

    #[inline]
    fn bitand(self, other: Ready) -> Ready {
        Ready(self.0 & other.0)
    }
}

impl ops::Sub for Ready {
    type Output = Ready;

    #[inline]
    fn sub(self, other: Ready) -> Ready {
        Ready(self.0 & !other.0)
    }
}

impl fmt::Debug for Ready {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut one = false;
        let flags = [
            (Ready::READABLE, "Readable"),
            (Ready::WRITABLE, "Writable"),
            (Ready::ERROR, "Error"),
            (Ready::HUP, "Hup"),
        ];

        write!(f, "Ready {{")?;

        for &(flag, msg) in &flags {
            if self.contains(flag) {
                if one {
                    write!(f, " | ")?
                }
                write!(f, "{msg}")?;

                one = true
            }
        }

        write!(f, "}}")?;

        Ok(())
    }
}

impl fmt::Display for Ready {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}{}{}{}",
            if self.is_readable() { "R" } else { "-" },
            if self.is_writable() { "W" } else { "-" },
            if self.is_error() { "E" } else { "-" },
            if self.is_hup() { "H" } else { "-" },
        )
    }
}

impl From<&mio::event::Event> for Ready {
    fn from(event: &mio::event::Event) -> Self {
        let mut ready = Ready::EMPTY;
        if event.is_readable() {
            ready.insert(Ready::READABLE);
        }
        if event.is_writable() {
            ready.insert(Ready::WRITABLE);
        }
        if event.is_error() {
            ready.insert(Ready::ERROR);
        }
        if event.is_read_closed() || event.is_write_closed() {
            ready.insert(Ready::HUP);
        }
        ready
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_remove() {
        let mut ready = Ready::READABLE | Ready::HUP;
        assert!(ready.is_readable());
        assert!(!ready.is_writable());

        ready.insert(Ready::WRITABLE);
        ready.remove(Ready::READABLE);
        assert_eq!(ready, Ready::WRITABLE | Ready::HUP);
        assert_eq!(format!("{ready}"), "-W-H");
        assert_eq!(format!("{ready:?}"), "Ready {Writable | Hup}");
    }

    #[test]
    fn filter_with_and() {
        let interest = Ready::READABLE | Ready::ERROR;
        let event = Ready::READABLE | Ready::WRITABLE;
        assert_eq!(interest & event, Ready::READABLE);
        assert_eq!(event - Ready::READABLE, Ready::WRITABLE);
        assert!((Ready::WRITABLE & Ready::READABLE).is_empty());
    }
}
