mod reflect;

use proc_macro::TokenStream;

#[proc_macro_derive(Reflected, attributes(reflect))]
pub fn derive_reflected(input: TokenStream) -> TokenStream {
	reflect::derive(input).into()
}
