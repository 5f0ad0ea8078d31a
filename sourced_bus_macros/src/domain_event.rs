use proc_macro::TokenStream;
use quote::quote;
use syn::DeriveInput;

pub fn derive_domain_event(input: TokenStream) -> TokenStream {
    let input = syn::parse_macro_input!(input as DeriveInput);
    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let event_name = name.to_string();
    let event_type = to_lower_kebab_case(&event_name);

    let expanded = quote! {
        impl #impl_generics ::sourced_bus::DomainEvent for #name #ty_generics #where_clause {
            const EVENT_NAME: &'static str = #event_name;
            const EVENT_TYPE: &'static str = #event_type;
        }
    };

    TokenStream::from(expanded)
}

// Must stay in lockstep with `sourced_bus::naming::to_lower_kebab_case`.
fn to_lower_kebab_case(s: &str) -> String {
    if s.trim().is_empty() || !s.chars().any(is_uppercase_letter) {
        return s.to_string();
    }

    let mut result = String::with_capacity(s.len() + 4);
    for (i, ch) in s.chars().filter(|c| *c != '-').enumerate() {
        if is_uppercase_letter(ch) && i > 0 {
            result.push('-');
        }
        result.push(ch);
    }
    result.to_lowercase()
}

// BMP `Lu` only; Roman numerals and circled letters are not word starts.
fn is_uppercase_letter(ch: char) -> bool {
    ch.is_uppercase()
        && u32::from(ch) <= 0xFFFF
        && !matches!(ch, '\u{2160}'..='\u{216F}' | '\u{24B6}'..='\u{24CF}')
}
