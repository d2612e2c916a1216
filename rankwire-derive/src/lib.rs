//! `#[derive(Equivalence)]` for structs whose fields all implement `Equivalence`
//!
//! Fields are laid out back to back in declaration order. The path of the `rankwire` crate can
//! be overridden for renamed dependencies with `#[rankwire(crate = "::path")]`.

type TokenStream1 = proc_macro::TokenStream;
type TokenStream2 = proc_macro2::TokenStream;

use quote::{format_ident, quote};
use syn::{parse_quote, DeriveInput, Fields, GenericParam, Path};

#[proc_macro_derive(Equivalence, attributes(rankwire))]
pub fn create_user_datatype(input: TokenStream1) -> TokenStream1 {
    let ast: DeriveInput = match syn::parse(input) {
        Ok(ast) => ast,
        Err(err) => return err.to_compile_error().into(),
    };
    let result = crate_path(&ast).and_then(|krate| match ast.data {
        syn::Data::Enum(_) => Err(syn::Error::new_spanned(
            &ast.ident,
            "#[derive(Equivalence)] is not compatible with enums",
        )),
        syn::Data::Union(_) => Err(syn::Error::new_spanned(
            &ast.ident,
            "#[derive(Equivalence)] is not compatible with unions",
        )),
        syn::Data::Struct(ref s) => Ok(equivalence_for_struct(&ast, &s.fields, &krate)),
    });
    result.unwrap_or_else(|err| err.to_compile_error()).into()
}

fn crate_path(ast: &DeriveInput) -> syn::Result<Path> {
    let mut path = None;
    for attr in ast.attrs.iter().filter(|attr| attr.path().is_ident("rankwire")) {
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("crate") {
                let lit: syn::LitStr = meta.value()?.parse()?;
                path = Some(lit.parse()?);
                Ok(())
            } else {
                Err(meta.error("unsupported rankwire attribute"))
            }
        })?;
    }
    Ok(path.unwrap_or_else(|| parse_quote!(::rankwire)))
}

fn equivalence_for_struct(ast: &DeriveInput, fields: &Fields, krate: &Path) -> TokenStream2 {
    let ident = &ast.ident;
    let equivalence = quote!(#krate::datatype::Equivalence);

    let mut generics = ast.generics.clone();
    let bounded: Vec<_> = generics
        .params
        .iter()
        .filter_map(|param| match param {
            GenericParam::Type(ty) => Some(ty.ident.clone()),
            _ => None,
        })
        .collect();
    let where_clause = generics.make_where_clause();
    for param in bounded {
        where_clause
            .predicates
            .push(parse_quote!(#param: #equivalence));
    }
    let (impl_generics, ty_generics, where_clause) = generics.split_for_impl();

    let types: Vec<_> = fields.iter().map(|field| &field.ty).collect();
    let bindings: Vec<_> = (0..types.len())
        .map(|i| format_ident!("__field{}", i))
        .collect();
    let members: Vec<TokenStream2> = match fields {
        Fields::Named(ref fields) => fields
            .named
            .iter()
            .map(|field| {
                let name = &field.ident;
                quote!(#name)
            })
            .collect(),
        Fields::Unnamed(_) | Fields::Unit => (0..types.len())
            .map(|i| {
                let index = syn::Index::from(i);
                quote!(#index)
            })
            .collect(),
    };
    let construct = match fields {
        Fields::Named(_) => quote!(Self { #(#members: #bindings),* }),
        Fields::Unnamed(_) => quote!(Self(#(#bindings),*)),
        Fields::Unit => quote!(Self),
    };

    quote! {
        impl #impl_generics #equivalence for #ident #ty_generics #where_clause {
            const SIZE: usize = 0 #(+ <#types as #equivalence>::SIZE)*;

            #[allow(unused_mut, unused_assignments, unused_variables)]
            fn encode(&self, out: &mut [u8]) {
                let mut offset = 0;
                #(
                    #equivalence::encode(&self.#members, &mut out[offset..]);
                    offset += <#types as #equivalence>::SIZE;
                )*
            }

            #[allow(unused_mut, unused_assignments, unused_variables)]
            fn decode(bytes: &[u8]) -> #krate::Result<Self> {
                let mut offset = 0;
                #(
                    let #bindings = <#types as #equivalence>::decode(&bytes[offset..])?;
                    offset += <#types as #equivalence>::SIZE;
                )*
                Ok(#construct)
            }
        }
    }
}
