use super::error::{Result, WireError};

/// `u32 length` followed by `u32 command`.
pub const FRAME_HEADER_LEN: usize = 8;

/// Width of object pointers on the wire.
///
/// Players announce their pointer size in the version message; everything
/// before that (and every player too old to say) uses 4-byte pointers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum PointerWidth {
    #[default]
    Four,
    Eight,
}

impl PointerWidth {
    pub fn from_size(size: u8) -> Option<Self> {
        match size {
            4 => Some(Self::Four),
            8 => Some(Self::Eight),
            _ => None,
        }
    }

    pub fn size(self) -> usize {
        match self {
            Self::Four => 4,
            Self::Eight => 8,
        }
    }
}

/// Display class name for the player's native object class codes.
pub fn class_name_for(class_type: u32, is_movie_clip: bool) -> String {
    let name = match class_type {
        0 if is_movie_clip => "MovieClip",
        0 => "Object",
        1 => "XMLSocket",
        2 => "TextField",
        3 => "Button",
        4 => "Number",
        5 => "Boolean",
        6 => "String",
        7 => "Array",
        8 => "Date",
        9 => "Sound",
        10 => "XML",
        11 => "XMLNode",
        12 => "Camera",
        13 => "Microphone",
        14 => "Communication",
        15 => "Connection",
        16 => "Stream",
        17 => "Video",
        18 => "TextFormat",
        19 => "SharedObject",
        20 => "SharedObjectData",
        21 => "PrintJob",
        22 => "MovieClipLoader",
        23 => "StyleSheet",
        24 => "FapPacket",
        25 => "LoadVars",
        26 => "TextSnapshot",
        other => return format!("unknown<{other}>"),
    };
    name.to_string()
}

/// Appends little-endian fields to a buffer.
///
/// A writer created with [`WireWriter::with_limit`] refuses to grow past its
/// limit and reports [`WireError::BufferOverflow`] instead.
pub struct WireWriter {
    buf: Vec<u8>,
    limit: Option<usize>,
    width: PointerWidth,
}

impl WireWriter {
    pub fn growable(width: PointerWidth) -> Self {
        Self::from_buf(Vec::new(), None, width)
    }

    pub fn with_limit(limit: usize, width: PointerWidth) -> Self {
        Self::from_buf(Vec::with_capacity(limit.min(256)), Some(limit), width)
    }

    /// Reuses `buf` (cleared) as the backing storage.
    pub fn from_buf(mut buf: Vec<u8>, limit: Option<usize>, width: PointerWidth) -> Self {
        buf.clear();
        Self { buf, limit, width }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.buf
    }

    fn reserve(&self, n: usize) -> Result<()> {
        if let Some(limit) = self.limit {
            let available = limit.saturating_sub(self.buf.len());
            if n > available {
                return Err(WireError::BufferOverflow {
                    needed: n,
                    available,
                });
            }
        }
        Ok(())
    }

    pub fn write_u8(&mut self, v: u8) -> Result<()> {
        self.write_bytes(&[v])
    }

    pub fn write_bool(&mut self, v: bool) -> Result<()> {
        self.write_u8(u8::from(v))
    }

    pub fn write_u16(&mut self, v: u16) -> Result<()> {
        self.write_bytes(&v.to_le_bytes())
    }

    pub fn write_u32(&mut self, v: u32) -> Result<()> {
        self.write_bytes(&v.to_le_bytes())
    }

    pub fn write_u64(&mut self, v: u64) -> Result<()> {
        self.write_bytes(&v.to_le_bytes())
    }

    /// Writes an object pointer at the connection's pointer width. Negative
    /// pseudo ids keep their two's-complement low bytes.
    pub fn write_ptr(&mut self, v: i64) -> Result<()> {
        match self.width {
            PointerWidth::Four => self.write_u32(v as u32),
            PointerWidth::Eight => self.write_u64(v as u64),
        }
    }

    /// NUL-terminated UTF-8.
    pub fn write_string(&mut self, s: &str) -> Result<()> {
        self.reserve(s.len() + 1)?;
        self.buf.extend_from_slice(s.as_bytes());
        self.buf.push(0);
        Ok(())
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.reserve(bytes.len())?;
        self.buf.extend_from_slice(bytes);
        Ok(())
    }
}

/// Reads little-endian fields from a payload, front to back.
pub struct WireReader<'a> {
    buf: &'a [u8],
    pos: usize,
    width: PointerWidth,
}

impl<'a> WireReader<'a> {
    pub fn new(buf: &'a [u8], width: PointerWidth) -> Self {
        Self { buf, pos: 0, width }
    }

    fn require(&self, n: usize) -> Result<()> {
        match self.pos.checked_add(n) {
            Some(end) if end <= self.buf.len() => Ok(()),
            _ => Err(WireError::MalformedMessage(format!(
                "buffer underflow: need {n} bytes at {}, have {}",
                self.pos,
                self.buf.len()
            ))),
        }
    }

    pub fn width(&self) -> PointerWidth {
        self.width
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    pub fn has_remaining(&self) -> bool {
        self.remaining() > 0
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        self.require(1)?;
        let v = self.buf[self.pos];
        self.pos += 1;
        Ok(v)
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        let bytes = self.read_array::<2>()?;
        Ok(u16::from_le_bytes(bytes))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let bytes = self.read_array::<4>()?;
        Ok(u32::from_le_bytes(bytes))
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(self.read_u32()? as i32)
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        let bytes = self.read_array::<8>()?;
        Ok(u64::from_le_bytes(bytes))
    }

    /// Reads an object pointer. A 4-byte pointer is sign-extended so that
    /// `0xffffffff` comes back as `-1`.
    pub fn read_ptr(&mut self) -> Result<i64> {
        match self.width {
            PointerWidth::Four => Ok(i64::from(self.read_u32()? as i32)),
            PointerWidth::Eight => Ok(self.read_u64()? as i64),
        }
    }

    /// Reads up to (and consumes) the next NUL byte.
    pub fn read_string(&mut self) -> Result<String> {
        let rest = &self.buf[self.pos.min(self.buf.len())..];
        let Some(nul) = rest.iter().position(|b| *b == 0) else {
            return Err(WireError::MalformedMessage(format!(
                "unterminated string at {}",
                self.pos
            )));
        };
        let s = std::str::from_utf8(&rest[..nul]).map_err(|err| {
            WireError::MalformedMessage(format!("invalid utf-8 string at {}: {err}", self.pos))
        })?;
        let s = s.to_string();
        self.pos += nul + 1;
        Ok(s)
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        self.require(n)?;
        let bytes = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(bytes)
    }

    /// Everything left in the payload.
    pub fn read_rest(&mut self) -> &'a [u8] {
        let start = self.pos.min(self.buf.len());
        self.pos = self.buf.len();
        &self.buf[start..]
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        self.require(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(&self.buf[self.pos..self.pos + N]);
        self.pos += N;
        Ok(out)
    }
}
