use std::fmt::{Debug, Formatter};
use std::io::{Cursor, Error, ErrorKind};

use crate::raw::heaps::{SizeDebugWrapper, StringIndex};
use crate::utilities::read_compressed_u32;

#[derive(Copy, Clone)]
pub struct StringHeap<'l> {
	data: &'l [u8],
}

impl<'l> TryFrom<&'l [u8]> for StringHeap<'l> {
	type Error = Error;
	fn try_from(data: &'l [u8]) -> Result<Self, Self::Error> {
		match data.as_ref() {
			[0, ..] => Ok(Self { data }),
			_ => Err(ErrorKind::InvalidData.into()),
		}
	}
}

impl<'l> StringHeap<'l> {
	pub fn get(&self, idx: StringIndex) -> Option<&'l str> {
		let slice = self.data.as_ref().get(idx.0..)?;
		let end = slice.iter().position(|c| *c == 0)?;
		std::str::from_utf8(&slice[..end]).ok()
	}
}

impl Debug for StringHeap<'_> {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		let mut dbg = f.debug_struct("StringHeap");
		dbg.field("data", &SizeDebugWrapper(self.data.len()));
		dbg.finish()
	}
}

pub struct UserStringHeap<'l> {
	data: &'l [u8],
}

impl<'l> From<&'l [u8]> for UserStringHeap<'l> {
	fn from(data: &'l [u8]) -> Self {
		Self { data }
	}
}

impl<'l> UserStringHeap<'l> {
	/// Decodes the UTF-16 entry at byte offset `idx` (ECMA-335 §II.24.2.4): a compressed
	/// length prefix covering the UTF-16 bytes plus one trailing flag byte, which this decode
	/// ignores since it only affects whether the CLR treats the string specially at runtime.
	pub fn get(&self, idx: usize) -> Option<String> {
		let slice = self.data.get(idx..)?;
		let mut cursor = Cursor::new(slice);
		let len = read_compressed_u32(&mut cursor).ok()? as usize;
		if len == 0 {
			return Some(String::new());
		}
		let start = cursor.position() as usize;
		let char_bytes = slice.get(start..start + len.saturating_sub(1))?;
		let units = char_bytes.chunks_exact(2).map(|c| u16::from_le_bytes([c[0], c[1]]));
		Some(char::decode_utf16(units).map(|r| r.unwrap_or(char::REPLACEMENT_CHARACTER)).collect())
	}

	pub(crate) fn bytes(&self) -> &'l [u8] {
		self.data
	}
}

impl Debug for UserStringHeap<'_> {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		let mut dbg = f.debug_struct("UserStringHeap");
		dbg.field("data", &SizeDebugWrapper(self.data.len()));
		dbg.finish()
	}
}
