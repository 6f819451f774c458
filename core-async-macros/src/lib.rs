//! Attribute macros backing `#[core_async::test]` and `#[core_async::main]`.
//!
//! Both macros turn an `async fn` into a synchronous one that drives the body
//! on a runtime built by `core_async::runtime`, so downstream crates never
//! name tokio directly. The runtime flavor is selectable:
//!
//! ```ignore
//! #[core_async::test]
//! async fn runs_on_current_thread() {}
//!
//! #[core_async::test(flavor = "multi_thread", worker_threads = 4)]
//! async fn runs_on_a_pool() {}
//! ```

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{parse_macro_input, ItemFn, LitInt, LitStr};

const DEFAULT_WORKER_THREADS: usize = 2;

#[proc_macro_attribute]
pub fn test(attr: TokenStream, item: TokenStream) -> TokenStream {
    expand(attr, item, MacroKind::Test)
}

#[proc_macro_attribute]
pub fn main(attr: TokenStream, item: TokenStream) -> TokenStream {
    expand(attr, item, MacroKind::Main)
}

enum MacroKind {
    Test,
    Main,
}

#[derive(Default)]
struct RuntimeArgs {
    multi_thread: bool,
    worker_threads: Option<usize>,
}

fn parse_args(attr: TokenStream) -> syn::Result<RuntimeArgs> {
    let mut args = RuntimeArgs::default();

    let parser = syn::meta::parser(|meta| {
        if meta.path.is_ident("flavor") {
            let value: LitStr = meta.value()?.parse()?;
            match value.value().as_str() {
                "current_thread" => args.multi_thread = false,
                "multi_thread" => args.multi_thread = true,
                other => {
                    return Err(meta.error(format!("unknown runtime flavor `{}`", other)));
                }
            }
            Ok(())
        } else if meta.path.is_ident("worker_threads") {
            let value: LitInt = meta.value()?.parse()?;
            args.worker_threads = Some(value.base10_parse()?);
            Ok(())
        } else {
            Err(meta.error("expected `flavor` or `worker_threads`"))
        }
    });

    syn::parse::Parser::parse(parser, attr)?;

    if args.worker_threads.is_some() {
        args.multi_thread = true;
    }

    Ok(args)
}

fn expand(attr: TokenStream, item: TokenStream, kind: MacroKind) -> TokenStream {
    let args = match parse_args(attr) {
        Ok(args) => args,
        Err(err) => return err.to_compile_error().into(),
    };

    let input = parse_macro_input!(item as ItemFn);

    if input.sig.asyncness.is_none() {
        return syn::Error::new_spanned(
            input.sig.fn_token,
            "core_async attribute macros require `async fn`",
        )
        .to_compile_error()
        .into();
    }

    let mut sync_sig = input.sig.clone();
    sync_sig.asyncness = None;

    let attrs = input.attrs;
    let vis = input.vis;
    let block = input.block;

    let driver = runtime_driver(&args, quote!(async move #block));

    let test_attr = match kind {
        MacroKind::Test => quote!(#[test]),
        MacroKind::Main => TokenStream2::new(),
    };

    quote! {
        #(#attrs)*
        #test_attr
        #vis #sync_sig {
            #driver
        }
    }
    .into()
}

fn runtime_driver(args: &RuntimeArgs, body: TokenStream2) -> TokenStream2 {
    if args.multi_thread {
        let workers = args.worker_threads.unwrap_or(DEFAULT_WORKER_THREADS);
        quote!(core_async::runtime::block_on_multi_thread(#workers, #body))
    } else {
        quote!(core_async::runtime::block_on(#body))
    }
}
