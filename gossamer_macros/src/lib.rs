extern crate proc_macro;
use proc_macro::TokenStream;

mod gossip_interface;

use gossip_interface::RootImpl;

/// Turns a message enum into a union the handler pipeline can dispatch on.
///
/// Every variant annotated with `#[gossip]` must have exactly one field. For each of them the
/// derive generates `From<Field>` for the enum and `gossamer::handlers::Case<Field>`, so a
/// [`Typed`](../gossamer/handlers/struct.Typed.html) handler for `Field` can pick the variant out
/// of the union. `#[gossip(no_from)]` keeps the `Case` impl but skips `From`, for field types
/// that should not silently convert into the union. Two annotated variants cannot share a field
/// type. The whole enum also gets `gossamer::handlers::MessageKind`.
///
/// ```ignore
/// #[derive(GossipInterface)]
/// enum MyMessages {
///   #[gossip]
///   Greeting(String),
///   #[gossip(no_from)]
///   Farewell(Vec<u8>),
///   Tick,
/// }
/// ```
#[proc_macro_derive(GossipInterface, attributes(gossip))]
pub fn gossip_interface(item: TokenStream) -> TokenStream {
  match syn::parse(item) {
    Ok(ast) => RootImpl::derive(ast)
      .map(|x| x.expand())
      .unwrap_or_else(|x| x.to_compile_error().into()),
    Err(e) => e.to_compile_error().into(),
  }
}
