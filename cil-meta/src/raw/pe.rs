use std::fmt::Debug;
use std::io::{Cursor, Error, ErrorKind, Read, Seek, SeekFrom};

use bitflags::bitflags;

use crate::utilities::{impl_from_byte_stream, FromByteStream};

#[repr(C)]
#[derive(Debug, Copy, Clone)]
pub struct DOSHeader {
	pub magic: [u8; 2],
	_reserved: [u8; 0x3A],
	pub pe_header_offset: u32,
}

impl FromByteStream for DOSHeader {
	type Deps = ();
	fn read(stream: &mut Cursor<&[u8]>, _: &Self::Deps) -> std::io::Result<Self> {
		let magic = <[u8; 2]>::read(stream, &())?;
		if &magic != b"MZ" {
			return Err(Error::new(ErrorKind::InvalidData, "Missing DOS header magic"));
		}
		stream.seek(SeekFrom::Current(0x3A))?;
		let pe_header_offset = u32::read(stream, &())?;
		Ok(Self { magic, _reserved: [0; 0x3A], pe_header_offset })
	}
}

#[repr(C)]
#[derive(Debug, Copy, Clone)]
pub struct ImageFileHeader {
	pub machine: u16,
	pub number_of_sections: u16,
	pub time_date_stamp: u32,
	pub pointer_to_symbol_table: u32,
	pub number_of_symbols: u32,
	pub size_of_optional_header: u16,
	pub characteristics: u16,
}

impl_from_byte_stream!(ImageFileHeader);

#[repr(C)]
#[derive(Debug, Copy, Clone)]
pub struct DataDirectory {
	pub virtual_address: u32,
	pub size: u32,
}

impl_from_byte_stream!(DataDirectory);

#[repr(C)]
#[derive(Debug, Copy, Clone)]
pub struct ImageOptionalHeader32 {
	pub magic: u16,
	pub major_linker_version: u8,
	pub minor_linker_version: u8,
	pub size_of_code: u32,
	pub size_of_initialized_data: u32,
	pub size_of_uninitialized_data: u32,
	pub address_of_entry_point: u32,
	pub base_of_code: u32,
	pub base_of_data: u32,
	pub image_base: u32,
	pub section_alignment: u32,
	pub file_alignment: u32,
	pub major_os_version: u16,
	pub minor_os_version: u16,
	pub major_image_version: u16,
	pub minor_image_version: u16,
	pub major_subsystem_version: u16,
	pub minor_subsystem_version: u16,
	pub win32_version_value: u32,
	pub size_of_image: u32,
	pub size_of_headers: u32,
	pub checksum: u32,
	pub subsystem: u16,
	pub dll_characteristics: u16,
	pub size_of_stack_reserve: u32,
	pub size_of_stack_commit: u32,
	pub size_of_heap_reserve: u32,
	pub size_of_heap_commit: u32,
	pub loader_flags: u32,
	pub number_of_rva_and_sizes: u32,
	pub data_directories: Vec<DataDirectory>,
}

impl FromByteStream for ImageOptionalHeader32 {
	type Deps = ();
	fn read(stream: &mut Cursor<&[u8]>, _: &Self::Deps) -> std::io::Result<Self> {
		macro_rules! field {
			() => {
				FromByteStream::read(stream, &())?
			};
		}

		let magic = field!();
		let major_linker_version = field!();
		let minor_linker_version = field!();
		let size_of_code = field!();
		let size_of_initialized_data = field!();
		let size_of_uninitialized_data = field!();
		let address_of_entry_point = field!();
		let base_of_code = field!();
		let base_of_data = field!();
		let image_base = field!();
		let section_alignment = field!();
		let file_alignment = field!();
		let major_os_version = field!();
		let minor_os_version = field!();
		let major_image_version = field!();
		let minor_image_version = field!();
		let major_subsystem_version = field!();
		let minor_subsystem_version = field!();
		let win32_version_value = field!();
		let size_of_image = field!();
		let size_of_headers = field!();
		let checksum = field!();
		let subsystem = field!();
		let dll_characteristics = field!();
		let size_of_stack_reserve = field!();
		let size_of_stack_commit = field!();
		let size_of_heap_reserve = field!();
		let size_of_heap_commit = field!();
		let loader_flags = field!();
		let number_of_rva_and_sizes: u32 = field!();

		let mut data_directories = Vec::with_capacity(number_of_rva_and_sizes as usize);
		for _ in 0..number_of_rva_and_sizes {
			data_directories.push(DataDirectory::read(stream, &())?);
		}

		Ok(Self {
			magic, major_linker_version, minor_linker_version, size_of_code,
			size_of_initialized_data, size_of_uninitialized_data, address_of_entry_point,
			base_of_code, base_of_data, image_base, section_alignment, file_alignment,
			major_os_version, minor_os_version, major_image_version, minor_image_version,
			major_subsystem_version, minor_subsystem_version, win32_version_value,
			size_of_image, size_of_headers, checksum, subsystem, dll_characteristics,
			size_of_stack_reserve, size_of_stack_commit, size_of_heap_reserve, size_of_heap_commit,
			loader_flags, number_of_rva_and_sizes, data_directories,
		})
	}
}

#[repr(C)]
#[derive(Debug, Copy, Clone)]
pub struct ImageOptionalHeader64 {
	pub magic: u16,
	pub major_linker_version: u8,
	pub minor_linker_version: u8,
	pub size_of_code: u32,
	pub size_of_initialized_data: u32,
	pub size_of_uninitialized_data: u32,
	pub address_of_entry_point: u32,
	pub base_of_code: u32,
	pub image_base: u64,
	pub section_alignment: u32,
	pub file_alignment: u32,
	pub major_os_version: u16,
	pub minor_os_version: u16,
	pub major_image_version: u16,
	pub minor_image_version: u16,
	pub major_subsystem_version: u16,
	pub minor_subsystem_version: u16,
	pub win32_version_value: u32,
	pub size_of_image: u32,
	pub size_of_headers: u32,
	pub checksum: u32,
	pub subsystem: u16,
	pub dll_characteristics: u16,
	pub size_of_stack_reserve: u64,
	pub size_of_stack_commit: u64,
	pub size_of_heap_reserve: u64,
	pub size_of_heap_commit: u64,
	pub loader_flags: u32,
	pub number_of_rva_and_sizes: u32,
	pub data_directories: Vec<DataDirectory>,
}

impl FromByteStream for ImageOptionalHeader64 {
	type Deps = ();
	fn read(stream: &mut Cursor<&[u8]>, _: &Self::Deps) -> std::io::Result<Self> {
		macro_rules! field {
			() => {
				FromByteStream::read(stream, &())?
			};
		}

		let magic = field!();
		let major_linker_version = field!();
		let minor_linker_version = field!();
		let size_of_code = field!();
		let size_of_initialized_data = field!();
		let size_of_uninitialized_data = field!();
		let address_of_entry_point = field!();
		let base_of_code = field!();
		let image_base = field!();
		let section_alignment = field!();
		let file_alignment = field!();
		let major_os_version = field!();
		let minor_os_version = field!();
		let major_image_version = field!();
		let minor_image_version = field!();
		let major_subsystem_version = field!();
		let minor_subsystem_version = field!();
		let win32_version_value = field!();
		let size_of_image = field!();
		let size_of_headers = field!();
		let checksum = field!();
		let subsystem = field!();
		let dll_characteristics = field!();
		let size_of_stack_reserve = field!();
		let size_of_stack_commit = field!();
		let size_of_heap_reserve = field!();
		let size_of_heap_commit = field!();
		let loader_flags = field!();
		let number_of_rva_and_sizes: u32 = field!();

		let mut data_directories = Vec::with_capacity(number_of_rva_and_sizes as usize);
		for _ in 0..number_of_rva_and_sizes {
			data_directories.push(DataDirectory::read(stream, &())?);
		}

		Ok(Self {
			magic, major_linker_version, minor_linker_version, size_of_code,
			size_of_initialized_data, size_of_uninitialized_data, address_of_entry_point,
			base_of_code, image_base, section_alignment, file_alignment,
			major_os_version, minor_os_version, major_image_version, minor_image_version,
			major_subsystem_version, minor_subsystem_version, win32_version_value,
			size_of_image, size_of_headers, checksum, subsystem, dll_characteristics,
			size_of_stack_reserve, size_of_stack_commit, size_of_heap_reserve, size_of_heap_commit,
			loader_flags, number_of_rva_and_sizes, data_directories,
		})
	}
}

#[derive(Debug, Copy, Clone)]
pub enum ImageOptionalHeader {
	None,
	PE32(ImageOptionalHeader32),
	PE64(ImageOptionalHeader64),
}

#[derive(Debug, Copy, Clone)]
pub struct PEHeader {
	pub image_file_header: ImageFileHeader,
	pub image_optional_header: ImageOptionalHeader,
}

impl FromByteStream for PEHeader {
	type Deps = ();
	fn read(stream: &mut Cursor<&[u8]>, _: &Self::Deps) -> std::io::Result<Self> {
		let signature = <[u8; 4]>::read(stream, &())?;
		if &signature != b"PE\0\0" {
			return Err(Error::new(ErrorKind::InvalidData, "Missing PE header signature"));
		}

		let image_file_header = ImageFileHeader::read(stream, &())?;

		let image_optional_header = match image_file_header.size_of_optional_header {
			0 => ImageOptionalHeader::None,
			_ => {
				let start = stream.position();
				let magic = u16::read(stream, &())?;
				stream.set_position(start);
				match magic {
					0x10B => ImageOptionalHeader::PE32(ImageOptionalHeader32::read(stream, &())?),
					0x20B => ImageOptionalHeader::PE64(ImageOptionalHeader64::read(stream, &())?),
					_ => return Err(Error::new(ErrorKind::InvalidData, "Unknown optional header magic")),
				}
			}
		};

		Ok(Self { image_file_header, image_optional_header })
	}
}

bitflags! {
	#[derive(Debug, Copy, Clone, Eq, PartialEq)]
	pub struct SectionCharacteristics: u32 {
		const CODE = 0x00000020;
		const INITIALIZED_DATA = 0x00000040;
		const UNINITIALIZED_DATA = 0x00000080;
		const MEM_EXECUTE = 0x20000000;
		const MEM_READ = 0x40000000;
		const MEM_WRITE = 0x80000000;
	}
}

impl_from_byte_stream!(SectionCharacteristics);

#[derive(Debug, Copy, Clone)]
pub struct SectionHeader {
	pub name: [u8; 8],
	pub virtual_size: u32,
	pub virtual_address: u32,
	pub size_of_raw_data: u32,
	pub pointer_to_raw_data: u32,
	pub pointer_to_relocations: u32,
	pub pointer_to_line_numbers: u32,
	pub number_of_relocations: u16,
	pub number_of_line_numbers: u16,
	pub characteristics: SectionCharacteristics,
}

impl_from_byte_stream!(SectionHeader);

impl SectionHeader {
	pub fn name(&self) -> &str {
		let end = self.name.iter().position(|c| *c == 0).unwrap_or(self.name.len());
		std::str::from_utf8(&self.name[..end]).unwrap_or("")
	}
}

#[derive(Debug)]
pub struct PEFile<'l> {
	pub dos_header: DOSHeader,
	pub pe_header: PEHeader,
	pub sections: Vec<SectionHeader>,
	data: &'l [u8],
}

impl<'l> FromByteStream for PEFile<'l> {
	type Deps = ();
	#[cfg_attr(feature = "tracing", tracing::instrument(skip_all))]
	fn read(stream: &mut Cursor<&'l [u8]>, _: &Self::Deps) -> std::io::Result<Self> {
		let data = *stream.get_ref();

		let dos_header = DOSHeader::read(stream, &())?;
		stream.seek(SeekFrom::Start(dos_header.pe_header_offset as u64))?;
		let pe_header = PEHeader::read(stream, &())?;

		let mut sections = Vec::with_capacity(pe_header.image_file_header.number_of_sections as usize);
		for _ in 0..pe_header.image_file_header.number_of_sections {
			sections.push(SectionHeader::read(stream, &())?);
		}

		Ok(Self { dos_header, pe_header, sections, data })
	}
}

impl<'l> PEFile<'l> {
	/// Resolves a relative virtual address to the section that contains it, the
	/// section's backing file data, and the byte offset of `rva` within that slice.
	pub fn resolve_rva(&self, rva: u32) -> Option<(&SectionHeader, &'l [u8], usize)> {
		let section = self.sections.iter().find(|s| {
			rva >= s.virtual_address && rva < s.virtual_address + s.virtual_size.max(s.size_of_raw_data)
		})?;

		let offset = (rva - section.virtual_address) as usize;
		let start = section.pointer_to_raw_data as usize;
		let end = start + section.size_of_raw_data as usize;
		let slice = self.data.get(start + offset..end)?;

		Some((section, slice, offset))
	}
}
