use proc_macro::TokenStream;
use syn::{parse_macro_input, DeriveInput};

mod gen;
mod parse;

pub(crate) struct RowStruct {
    ident: syn::Ident,
    table_name: String,
    rowid_field: Option<syn::Field>,
    fields: Vec<syn::Field>,
}

/// Derives `sharc::row::Row` for a plain struct that also derives
/// `serde::Deserialize`: the struct's columns deserialize positionally
/// through `sharc::record::ColumnValue`, and one field can opt into the
/// table's `INTEGER PRIMARY KEY` rowid alias by stacking `#[row(rowid)]`
/// with `#[serde(with = "sharc::row::rowid")]`.
///
/// ```ignore
/// #[derive(Deserialize, Row)]
/// #[row(table = "crashes")]
/// struct Crash {
///     #[row(rowid)]
///     #[serde(with = "sharc::row::rowid")]
///     id: i64,
///     severity: i32,
/// }
/// ```
#[proc_macro_derive(Row, attributes(row))]
pub fn derive_row(item: TokenStream) -> TokenStream {
    let input = parse_macro_input!(item as DeriveInput);
    let row = parse::parse_input(input);
    gen::row_impls(row).into()
}
