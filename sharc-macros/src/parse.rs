use convert_case::{Case, Casing};
use syn::{Attribute, Data, DeriveInput, Expr, Fields, FieldsNamed, Ident, Lit, Path};

use crate::RowStruct;

pub(crate) fn parse_input(input: DeriveInput) -> RowStruct {
    let ident = input.ident.clone();
    let Data::Struct(struct_) = input.data else {
        unimplemented!("#[derive(Row)] only supports structs");
    };
    let Fields::Named(fields) = struct_.fields else {
        unimplemented!("#[derive(Row)] requires named fields");
    };

    let default_name = ident.to_string().to_case(Case::Snake);
    let table_name = parse_struct_attrs(input.attrs).unwrap_or(default_name);
    let (fields, rowid_field) = parse_fields(fields);

    RowStruct {
        ident,
        table_name,
        rowid_field,
        fields,
    }
}

fn parse_struct_attrs(attrs: Vec<Attribute>) -> Option<String> {
    let mut name = None;

    for attr in attrs {
        if into_ident(attr.path()) == "row" {
            let arg = attr.parse_args::<Expr>().unwrap();
            let Expr::Assign(assign) = arg else {
                continue;
            };
            let Expr::Path(left) = *assign.left else {
                continue;
            };
            if into_ident(&left.path) == "table" {
                let Expr::Lit(lit) = *assign.right else {
                    unimplemented!("non-literal table name");
                };
                let Lit::Str(lit) = lit.lit else {
                    unimplemented!("non-string table name");
                };
                name = Some(lit.value());
            }
        }
    }

    name
}

fn parse_fields(fields: FieldsNamed) -> (Vec<syn::Field>, Option<syn::Field>) {
    let mut rowid_field = None;
    let mut out = Vec::new();

    for field in fields.named {
        for attr in &field.attrs {
            if into_ident(attr.path()) == "row" {
                let arg = attr.parse_args::<Path>().unwrap();
                if into_ident(&arg) == "rowid" {
                    rowid_field = Some(field.clone());
                }
            }
        }

        out.push(field);
    }

    (out, rowid_field)
}

fn into_ident(path: &Path) -> Ident {
    assert_eq!(path.segments.len(), 1);
    let path_segment = &path.segments[0];
    assert!(path_segment.arguments.is_empty());
    path_segment.ident.clone()
}
