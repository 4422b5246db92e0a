//! Процедурные макросы для приложений Quote Feed.
use proc_macro::TokenStream;
use quote::quote;
use syn::{Data, DeriveInput, Fields, parse_macro_input};

/// Derive-макрос для `Enum` из unit-вариантов: автоматически добавляет
/// реализации [`std::fmt::Display`], [`std::str::FromStr`] и метод
/// `as_str()`.
///
/// Строковое представление варианта задаётся атрибутом `#[str("...")]`,
/// по умолчанию это имя варианта в нижнем регистре. Разбор строки
/// нечувствителен к регистру и пробелам по краям.
///
/// Ошибка разбора — `FeedError::ValueError`, поэтому тип `FeedError` должен
/// быть в области видимости в месте применения макроса.
///
/// ## Пример
///
/// ```ignore
/// use commons::errors::FeedError;
/// use macros::QuoteEnumDisplay;
///
/// #[derive(Debug, Clone, QuoteEnumDisplay)]
/// enum SourceKind {
///     #[str("crypto")]
///     Crypto,
///     #[str("equity")]
///     Equity,
/// }
///
/// assert_eq!(SourceKind::Crypto.to_string(), "crypto");
/// assert_eq!(SourceKind::Equity.as_str(), "equity");
/// ```
#[proc_macro_derive(QuoteEnumDisplay, attributes(str))]
pub fn derive_display_fromstr(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let variants = match input.data {
        Data::Enum(e) => e.variants,
        _ => panic!("QuoteEnumDisplay допустимо использовать только с enum"),
    };

    let mut str_arms = Vec::new();
    let mut from_arms = Vec::new();

    for v in variants {
        let ident = v.ident;
        if !matches!(v.fields, Fields::Unit) {
            panic!("QuoteEnumDisplay: допустимы только unit-варианты");
        }
        let mut lit = ident.to_string().to_lowercase();
        for attr in v.attrs {
            if attr.path().is_ident("str") {
                let s: syn::LitStr = attr.parse_args().expect("ожидается #[str(\"...\")]");
                lit = s.value();
            }
        }
        let lit_str = syn::LitStr::new(&lit, proc_macro2::Span::call_site());
        let lit_lower = syn::LitStr::new(&lit.to_lowercase(), proc_macro2::Span::call_site());
        str_arms.push(quote! { #name::#ident => #lit_str, });
        from_arms.push(quote! { #lit_lower => Ok(#name::#ident), });
    }

    let expanded = quote! {
        impl #impl_generics #name #ty_generics #where_clause {
            /// Строковое представление варианта.
            pub fn as_str(&self) -> &'static str {
                match self { #(#str_arms)* }
            }
        }

        impl #impl_generics std::fmt::Display for #name #ty_generics #where_clause {
            fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl #impl_generics std::str::FromStr for #name #ty_generics #where_clause {
            type Err = FeedError;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_lowercase().as_str() {
                    #(#from_arms)*
                    _ => Err(FeedError::value_err(format!(
                        "некорректное значение {}: {}",
                        stringify!(#name), s
                    ))),
                }
            }
        }
    };

    TokenStream::from(expanded)
}
