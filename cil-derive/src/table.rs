use proc_macro2::TokenStream;
use quote::{format_ident, quote};
use syn::{Data, DeriveInput, Field};

pub fn derive(tokens: proc_macro::TokenStream) -> TokenStream {
	let DeriveInput { vis, ident, data, .. } = syn::parse(tokens).unwrap();

	let data = match data {
		Data::Struct(data) => data,
		Data::Enum(_) => panic!("Enums are not supported"),
		Data::Union(_) => panic!("Unions are not supported"),
	};

	let table = format_ident!("{}Table", ident);
	let reads = data.fields.iter().map(|Field { ident, ty, .. }| {
		quote! {
			#ident: <#ty as crate::utilities::FromByteStream>::read(stream, sizes.as_ref())?
		}
	});

	quote! {
		#[derive(Debug)]
		#vis struct #table {
			row_size: usize,
			rows: Vec<#ident>,
		}

		impl #table {
			pub fn read(
				stream: &mut std::io::Cursor<&[u8]>,
				sizes: &crate::raw::indices::sizes::IndexSizes,
				len: usize,
			) -> std::io::Result<Self> {
				let start = stream.position() as usize;
				let mut rows = Vec::with_capacity(len);
				for _ in 0..len {
					rows.push(#ident { #(#reads),* })
				}
				let row_size = match len {
					0 => 0,
					_ => (stream.position() as usize - start) / len,
				};
				Ok(Self { rows, row_size })
			}

			pub fn rows(&self) -> &[#ident] {
				&self.rows
			}
		}

		impl crate::raw::heaps::table::Table for #table {
			fn len(&self) -> usize {
				self.rows.len()
			}

			fn kind(&self) -> crate::raw::heaps::table::TableKind {
				crate::raw::heaps::table::TableKind::#ident
			}

			fn row_size(&self) -> usize {
				self.row_size
			}
		}
	}
}
