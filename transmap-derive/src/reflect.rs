use proc_macro2::TokenStream;
use quote::quote;
use syn::parse::{Parse, ParseStream};
use syn::{Data, DeriveInput, Fields, Ident, Type};

struct MethodSpec {
	name: Ident,
	ty: Type,
}

impl Parse for MethodSpec {
	fn parse(input: ParseStream) -> syn::Result<Self> {
		let name = input.parse()?;
		input.parse::<syn::Token![:]>()?;
		let ty = input.parse()?;
		Ok(MethodSpec { name, ty })
	}
}

pub fn derive(tokens: proc_macro::TokenStream) -> TokenStream {
	let DeriveInput {
		attrs,
		ident,
		generics,
		data,
		..
	} = syn::parse(tokens).unwrap();

	if !generics.params.is_empty() {
		panic!("Generics are not supported");
	}

	let mut no_default = false;
	let mut has_default = false;
	let mut methods: Vec<MethodSpec> = Vec::new();

	for attr in attrs.iter() {
		if !attr.path().is_ident("reflect") {
			continue;
		}
		attr.parse_nested_meta(|meta| {
			if meta.path.is_ident("no_default") {
				no_default = true;
				return Ok(());
			}
			if meta.path.is_ident("default") {
				has_default = true;
				return Ok(());
			}
			if meta.path.is_ident("methods") {
				let content;
				syn::parenthesized!(content in meta.input);
				for method in content.parse_terminated(MethodSpec::parse, syn::Token![,])? {
					methods.push(method);
				}
				return Ok(());
			}
			Err(meta.error("unsupported reflect attribute"))
		})
		.unwrap();
	}

	match data {
		Data::Struct(data) => derive_struct(&ident, data, no_default, &methods),
		Data::Enum(_) => derive_enum(&ident, has_default),
		Data::Union(_) => panic!("Unions are not supported"),
	}
}

fn derive_struct(ident: &Ident, data: syn::DataStruct, no_default: bool, methods: &[MethodSpec]) -> TokenStream {
	let Fields::Named(fields) = data.fields else {
		panic!("Only structs with named fields are supported");
	};

	let ident_str = ident.to_string();
	let mut members = Vec::with_capacity(fields.named.len() + methods.len());

	for field in fields.named.iter() {
		let mut skip = false;
		let mut read_only = false;
		for attr in field.attrs.iter() {
			if !attr.path().is_ident("reflect") {
				continue;
			}
			attr.parse_nested_meta(|meta| {
				if meta.path.is_ident("skip") {
					skip = true;
					return Ok(());
				}
				if meta.path.is_ident("read_only") {
					read_only = true;
					return Ok(());
				}
				Err(meta.error("unsupported reflect attribute"))
			})
			.unwrap();
		}
		if skip {
			continue;
		}

		let field_ident = field.ident.as_ref().unwrap();
		let name_str = field_ident.to_string();
		let ty = &field.ty;
		let access = match read_only {
			true => quote!(::transmap::reflect::MemberAccess::READABLE),
			false => quote!(::transmap::reflect::MemberAccess::all()),
		};

		// `Option` members surface the underlying value; `None` reads as the
		// absent value and an absent write clears the member
		let accessors = match option_inner(ty) {
			Some(inner) => quote! {
				get: Some(|value| value.downcast_ref::<#ident>().and_then(|value| {
					value.#field_ident.as_ref()
						.map(|member| Box::new(member.clone()) as ::transmap::reflect::BoxedValue)
				})),
				set: Some(|value, member| {
					if let Some(value) = value.downcast_mut::<#ident>() {
						value.#field_ident = match member {
							Some(member) => member.downcast::<#inner>().ok().map(|member| *member),
							None => None,
						};
					}
				}),
			},
			None => quote! {
				get: Some(|value| value.downcast_ref::<#ident>().map(|value| {
					Box::new(value.#field_ident.clone()) as ::transmap::reflect::BoxedValue
				})),
				set: Some(|value, member| {
					if let (Some(value), Some(member)) = (value.downcast_mut::<#ident>(), member) {
						if let Ok(member) = member.downcast::<#ty>() {
							value.#field_ident = *member;
						}
					}
				}),
			},
		};

		members.push(quote! {
			::transmap::reflect::MemberDescriptor {
				name: #name_str,
				declaring_type: #ident_str,
				kind: ::transmap::reflect::MemberKind::Field,
				access: #access,
				value: <#ty as ::transmap::reflect::Reflected>::type_meta,
				#accessors
			}
		});
	}

	for method in methods {
		let method_ident = &method.name;
		let name_str = method_ident.to_string();
		let ty = &method.ty;
		members.push(quote! {
			::transmap::reflect::MemberDescriptor {
				name: #name_str,
				declaring_type: #ident_str,
				kind: ::transmap::reflect::MemberKind::Method,
				access: ::transmap::reflect::MemberAccess::READABLE,
				value: <#ty as ::transmap::reflect::Reflected>::type_meta,
				get: Some(|value| value.downcast_ref::<#ident>().map(|value| {
					Box::new(value.#method_ident()) as ::transmap::reflect::BoxedValue
				})),
				set: None,
			}
		});
	}

	let ctor = match no_default {
		true => quote!(None),
		false => quote! {
			Some(|| Box::new(<#ident as ::core::default::Default>::default())
				as ::transmap::reflect::BoxedValue)
		},
	};

	type_meta_impl(ident, &ident_str, quote!(::transmap::reflect::TypeShape::Object), quote!(vec![#(#members),*]), ctor)
}

fn derive_enum(ident: &Ident, has_default: bool) -> TokenStream {
	let ident_str = ident.to_string();
	let ctor = match has_default {
		false => quote!(None),
		true => quote! {
			Some(|| Box::new(<#ident as ::core::default::Default>::default())
				as ::transmap::reflect::BoxedValue)
		},
	};
	type_meta_impl(ident, &ident_str, quote!(::transmap::reflect::TypeShape::Scalar), quote!(Vec::new()), ctor)
}

fn type_meta_impl(ident: &Ident, ident_str: &str, shape: TokenStream, members: TokenStream, ctor: TokenStream) -> TokenStream {
	quote! {
		impl ::transmap::reflect::Reflected for #ident {
			fn type_meta() -> &'static ::transmap::reflect::TypeMeta {
				static META: ::std::sync::OnceLock<::transmap::reflect::TypeMeta> =
					::std::sync::OnceLock::new();
				META.get_or_init(|| ::transmap::reflect::TypeMeta {
					name: #ident_str,
					id: ::std::any::TypeId::of::<#ident>(),
					shape: #shape,
					members: #members,
					default_ctor: #ctor,
					clone_value: |value| value.downcast_ref::<#ident>().map(|value| {
						Box::new(value.clone()) as ::transmap::reflect::BoxedValue
					}),
					underlying: None,
					collection: None,
					sink: None,
					provider: None,
				})
			}
		}
	}
}

fn option_inner(ty: &Type) -> Option<&Type> {
	let Type::Path(path) = ty else { return None };
	let segment = path.path.segments.last()?;
	if segment.ident != "Option" {
		return None;
	}
	let syn::PathArguments::AngleBracketed(args) = &segment.arguments else { return None };
	match args.args.first() {
		Some(syn::GenericArgument::Type(inner)) if args.args.len() == 1 => Some(inner),
		_ => None,
	}
}
