//! Single code point payloads for the three character widths

/// One UTF-8 encoded code point, zero padded
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Char8 {
    pub c: [u8; 4],
}

impl Char8 {
    pub fn encode(ch: char) -> Self {
        let mut c = [0u8; 4];
        ch.encode_utf8(&mut c);
        Self { c }
    }

    pub fn decode(&self) -> Option<char> {
        let len = match self.c[0] {
            0x00..=0x7F => 1,
            0xC0..=0xDF => 2,
            0xE0..=0xEF => 3,
            0xF0..=0xF7 => 4,
            _ => return None,
        };
        core::str::from_utf8(&self.c[..len]).ok()?.chars().next()
    }
}

/// One UTF-16 encoded code point (a surrogate pair when needed)
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Char16 {
    pub c: [u16; 2],
}

impl Char16 {
    pub fn encode(ch: char) -> Self {
        let mut c = [0u16; 2];
        ch.encode_utf16(&mut c);
        Self { c }
    }

    pub fn decode(&self) -> Option<char> {
        char::decode_utf16(self.c.iter().copied()).next()?.ok()
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Char32 {
    pub c: u32,
}

impl Char32 {
    pub fn encode(ch: char) -> Self {
        Self { c: ch as u32 }
    }

    pub fn decode(&self) -> Option<char> {
        char::from_u32(self.c)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multibyte_code_points() {
        for ch in ['a', 'é', '€', '😀'] {
            assert_eq!(Char8::encode(ch).decode(), Some(ch));
            assert_eq!(Char16::encode(ch).decode(), Some(ch));
            assert_eq!(Char32::encode(ch).decode(), Some(ch));
        }
    }

    #[test]
    fn test_invalid_encodings() {
        assert_eq!(Char8 { c: [0xFF, 0, 0, 0] }.decode(), None);
        assert_eq!(Char16 { c: [0xDC00, 0] }.decode(), None);
        assert_eq!(Char32 { c: 0xD800 }.decode(), None);
    }
}
