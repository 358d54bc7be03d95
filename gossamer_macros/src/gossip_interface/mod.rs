use proc_macro::TokenStream;
use quote::quote;
use syn::spanned::Spanned;
use syn::{Attribute, DeriveInput, Error, Fields, Generics, Ident, Meta, NestedMeta, Type, Variant};

pub struct RootImpl {
  type_id: Ident,
  generics: Generics,
  generic_ids: Vec<Ident>,
  variants: Vec<GossipVariant>,
}
impl RootImpl {
  pub fn derive(ast: DeriveInput) -> syn::Result<Self> {
    derive(ast)
  }
  pub fn expand(&self) -> TokenStream {
    expand(self)
  }
}

fn derive(ast: DeriveInput) -> syn::Result<RootImpl> {
  let aspan = ast.span();
  let mut generic_ids = Vec::new();
  for param in ast.generics.params.iter() {
    match param {
      syn::GenericParam::Type(t) => generic_ids.push(t.ident.clone()),
      other => {
        return Err(Error::new(
          other.span(),
          "GossipInterface only allows type parameters.",
        ))
      }
    }
  }

  let data_enum = match ast.data {
    syn::Data::Enum(x) => x,
    _ => return Err(Error::new(aspan, "GossipInterface only supports enums.")),
  };
  if data_enum.variants.is_empty() {
    return Err(Error::new(aspan, "GossipInterface needs at least one variant."));
  }
  let variants = data_enum
    .variants
    .into_iter()
    .map(GossipVariant::get)
    .collect::<syn::Result<Vec<_>>>()?;

  // Two Case impls for the same field type would overlap.
  let mut seen: Vec<(String, &Ident)> = Vec::new();
  for v in variants.iter().filter(|v| v.annotated) {
    let ty = &v.field_types[0];
    let key = quote!(#ty).to_string();
    if let Some((_, first)) = seen.iter().find(|(k, _)| *k == key) {
      return Err(Error::new(
        ty.span(),
        format!("`{}` already has the same field type as `{}`.", v.variant_name, first),
      ));
    }
    seen.push((key, &v.variant_name));
  }

  Ok(RootImpl {
    type_id: ast.ident,
    generics: ast.generics,
    generic_ids: generic_ids,
    variants: variants,
  })
}

pub struct GossipVariant {
  pub variant_name: Ident,
  pub field_types: Vec<Type>,
  /// The field's name when the variant is a struct variant.
  pub field_name: Option<Ident>,
  pub annotated: bool,
  pub no_from: bool,
}
impl GossipVariant {
  fn get(variant: Variant) -> syn::Result<Self> {
    let vspan = variant.fields.span();
    let flags = gossip_flags(&variant.attrs)?;
    let (types, field_name) = match variant.fields {
      Fields::Named(n) => {
        let name = n.named.first().and_then(|f| f.ident.clone());
        (n.named.into_iter().map(|f| f.ty).collect::<Vec<_>>(), name)
      }
      Fields::Unnamed(u) => (u.unnamed.into_iter().map(|f| f.ty).collect(), None),
      Fields::Unit => (vec![], None),
    };
    if flags.is_some() && types.len() != 1 {
      return Err(Error::new(vspan, "GossipInterface variants must have exactly one field."));
    }
    Ok(GossipVariant {
      variant_name: variant.ident,
      field_types: types,
      field_name: field_name,
      annotated: flags.is_some(),
      no_from: flags.unwrap_or(false),
    })
  }
}

/// `None` without a `#[gossip]` attribute, otherwise whether it carried `no_from`.
fn gossip_flags(attrs: &[Attribute]) -> syn::Result<Option<bool>> {
  let mut found = attrs.iter().filter(|a| a.path.is_ident("gossip"));
  let attr = match found.next() {
    Some(attr) => attr,
    None => return Ok(None),
  };
  if let Some(extra) = found.next() {
    return Err(Error::new(extra.span(), "Only one 'gossip' attribute is allowed per variant."));
  }
  match attr.parse_meta()? {
    Meta::Path(_) => Ok(Some(false)),
    Meta::List(list) => {
      let mut no_from = false;
      for nested in list.nested.iter() {
        match nested {
          NestedMeta::Meta(Meta::Path(p)) if p.is_ident("no_from") && !no_from => no_from = true,
          NestedMeta::Meta(Meta::Path(p)) if p.is_ident("no_from") => {
            return Err(Error::new(p.span(), "Duplicate flag `no_from`"))
          }
          other => return Err(Error::new(other.span(), "'gossip' only understands `no_from`")),
        }
      }
      Ok(Some(no_from))
    }
    Meta::NameValue(nv) => Err(Error::new(nv.span(), "Write `#[gossip]` or `#[gossip(no_from)]`")),
  }
}

fn expand(root: &RootImpl) -> TokenStream {
  let type_id = &root.type_id;
  let generic_ids = &root.generic_ids;
  let generic_params = &root.generics.params;
  let type_id_with_generics: proc_macro2::TokenStream = quote!(#type_id<#(#generic_ids),*>);
  let where_predicates = root.generics.where_clause.as_ref().map(|x| &x.predicates);

  let annotated = root.variants.iter().filter(|v| v.annotated).collect::<Vec<_>>();

  let variant_pattern = |variant: &GossipVariant| {
    let variant_name = &variant.variant_name;
    match &variant.field_name {
      Some(name) => quote!(#type_id::#variant_name { #name: item }),
      None => quote!(#type_id::#variant_name(item)),
    }
  };

  let from_impls = annotated
    .iter()
    .copied()
    .filter(|v| !v.no_from)
    .map(|variant| {
      let field_type = &variant.field_types[0];
      let convert_toks = variant_pattern(variant);
      quote! {
        impl<#generic_params> ::std::convert::From<#field_type> for #type_id_with_generics
        where
          #where_predicates
        {
          fn from(item: #field_type) -> #type_id_with_generics {
            #convert_toks
          }
        }
      }
    });

  let case_impls = annotated.iter().copied().map(|variant| {
    let field_type = &variant.field_types[0];
    let pattern = variant_pattern(variant);
    quote! {
      impl<#generic_params> gossamer::handlers::Case<#field_type> for #type_id_with_generics
      where
        #where_predicates
      {
        #[allow(unreachable_patterns)]
        fn project(&self) -> ::std::option::Option<&#field_type> {
          match self {
            #pattern => ::std::option::Option::Some(item),
            _ => ::std::option::Option::None,
          }
        }
      }
    }
  });

  let kind_arms = root.variants.iter().map(|variant| {
    let variant_name = &variant.variant_name;
    let name = variant_name.to_string();
    quote!(#type_id::#variant_name { .. } => #name,)
  });

  let code = TokenStream::from(quote! {
    #(#from_impls)*

    #(#case_impls)*

    impl<#generic_params> gossamer::handlers::MessageKind for #type_id_with_generics
    where
      #where_predicates
    {
      fn kind(&self) -> &'static str {
        match self {
          #(#kind_arms)*
        }
      }
    }
  });
  code
}
