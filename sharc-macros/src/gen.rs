use quote::quote;

use crate::RowStruct;

pub(crate) fn row_impls(row: RowStruct) -> proc_macro2::TokenStream {
    let RowStruct {
        ident,
        table_name,
        rowid_field,
        fields,
    } = row;

    let column_names: Vec<String> = fields
        .iter()
        .map(|field| field.ident.as_ref().unwrap().to_string())
        .collect();

    let set_rowid_fn = rowid_field.as_ref().map(|rowid| {
        let rowid_ident = rowid.ident.as_ref().unwrap();
        let rowid_ty = &rowid.ty;
        quote! {
            fn set_rowid(&mut self, rowid: i64) {
                self.#rowid_ident = rowid as #rowid_ty;
            }
        }
    });

    let rowid_column = rowid_field
        .as_ref()
        .map(|rowid| rowid.ident.as_ref().unwrap().to_string());
    let rowid_column_tokens = match rowid_column {
        Some(name) => quote!(Some(#name)),
        None => quote!(None),
    };

    quote! {
        impl ::sharc::row::Row for #ident {
            const TABLE_NAME: &'static str = #table_name;
            const COLUMN_NAMES: &'static [&'static str] = &[#(#column_names),*];
            const ROWID_COLUMN: Option<&'static str> = #rowid_column_tokens;

            #set_rowid_fn

            fn from_row(
                rowid: i64,
                columns: &[::sharc::record::ColumnValue<'_>],
            ) -> ::sharc::Result<Self> {
                let mut value: Self = ::serde::Deserialize::deserialize(
                    ::sharc::row::columns_deserializer(columns),
                )?;
                ::sharc::row::Row::set_rowid(&mut value, rowid);
                Ok(value)
            }
        }
    }
}
