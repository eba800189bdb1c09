use crate::raw::indices::metadata_token::MetadataToken;

#[derive(Debug)]
pub enum ReadError {
	IoError(std::io::Error),
	MissingMetadataHeap(&'static str),
	MissingMetadataTable(&'static str),

	InvalidStringToken(MetadataToken),
	InvalidMethodRVA(u32),
	InvalidMethodCode(MetadataToken, std::io::Error),
	InvalidFieldSignature(usize),
	InvalidMemberRefSignature(usize),
	InvalidTypeSignature,

	#[cfg(feature = "memmap2")]
	MemMapError(memmap2::Error),
}

impl From<std::io::Error> for ReadError {
	fn from(value: std::io::Error) -> Self {
		Self::IoError(value)
	}
}

#[cfg(feature = "memmap2")]
impl From<memmap2::Error> for ReadError {
	fn from(value: memmap2::Error) -> Self {
		Self::IoError(value)
	}
}

impl std::fmt::Display for ReadError {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::IoError(e) => write!(f, "I/O error: {e}"),
			Self::MissingMetadataHeap(name) => write!(f, "assembly is missing the {name} metadata heap"),
			Self::MissingMetadataTable(name) => write!(f, "assembly is missing the {name} metadata table"),
			Self::InvalidStringToken(token) => write!(f, "invalid string token: {token:?}"),
			Self::InvalidMethodRVA(rva) => write!(f, "method RVA {rva:#X} does not resolve to a section"),
			Self::InvalidMethodCode(token, e) => write!(f, "method {token:?} has invalid IL: {e}"),
			Self::InvalidFieldSignature(blob) => write!(f, "field signature blob {blob:#X} does not resolve"),
			Self::InvalidMemberRefSignature(blob) => write!(f, "member reference signature blob {blob:#X} does not resolve"),
			Self::InvalidTypeSignature => write!(f, "invalid type signature"),
			#[cfg(feature = "memmap2")]
			Self::MemMapError(e) => write!(f, "memory-mapping error: {e}"),
		}
	}
}

impl std::error::Error for ReadError {}
