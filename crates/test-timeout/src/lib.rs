//! `#[timeout]` for plain tests and `#[tokio_timeout_test]` for async ones.
//!
//! Both run the body on a helper thread and fail the test with its name once
//! the deadline passes, so a wedged socket or channel cannot hang the suite.
//! The deadline is given in seconds and defaults to 30.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{parse_macro_input, Attribute, ItemFn, LitInt};

const DEFAULT_SECS: u64 = 30;

fn deadline_secs(attr: TokenStream) -> syn::Result<u64> {
    if attr.is_empty() {
        return Ok(DEFAULT_SECS);
    }
    let lit: LitInt = syn::parse(attr)?;
    let secs: u64 = lit.base10_parse()?;
    if secs == 0 {
        return Err(syn::Error::new(lit.span(), "deadline must be at least one second"));
    }
    Ok(secs)
}

fn has_path(attr: &Attribute, path: &[&str]) -> bool {
    let segments: Vec<String> = attr
        .path()
        .segments
        .iter()
        .map(|segment| segment.ident.to_string())
        .collect();
    segments == path
}

/// Emit a `#[test]` fn that runs `body` on a helper thread with a deadline.
fn guarded_test(item: ItemFn, secs: u64, body: TokenStream2) -> TokenStream2 {
    let ItemFn { attrs, vis, mut sig, .. } = item;
    sig.asyncness = None;
    let name = sig.ident.to_string();
    let attrs: Vec<Attribute> = attrs
        .into_iter()
        .filter(|attr| !has_path(attr, &["test"]) && !has_path(attr, &["tokio", "test"]))
        .collect();

    quote! {
        #[test]
        #(#attrs)*
        #vis #sig {
            let deadline = ::std::time::Duration::from_secs(#secs);
            let (done_tx, done_rx) = ::std::sync::mpsc::channel();
            ::std::thread::Builder::new()
                .name(#name.to_string())
                .spawn(move || {
                    let outcome =
                        ::std::panic::catch_unwind(::std::panic::AssertUnwindSafe(|| #body));
                    let _ = done_tx.send(outcome);
                })
                .expect("failed to spawn test thread");
            match done_rx.recv_timeout(deadline) {
                Ok(Ok(())) => {}
                Ok(Err(payload)) => ::std::panic::resume_unwind(payload),
                Err(::std::sync::mpsc::RecvTimeoutError::Timeout) => {
                    panic!("test `{}` exceeded its {}s deadline", #name, #secs)
                }
                Err(::std::sync::mpsc::RecvTimeoutError::Disconnected) => {
                    panic!("test `{}` thread exited without reporting", #name)
                }
            }
        }
    }
}

#[proc_macro_attribute]
pub fn tokio_timeout_test(attr: TokenStream, item: TokenStream) -> TokenStream {
    let secs = match deadline_secs(attr) {
        Ok(secs) => secs,
        Err(err) => return err.to_compile_error().into(),
    };
    let item = parse_macro_input!(item as ItemFn);
    if item.sig.asyncness.is_none() {
        return syn::Error::new_spanned(&item.sig.ident, "tokio_timeout_test expects an async fn")
            .to_compile_error()
            .into();
    }

    let block = &item.block;
    let body = quote! {{
        let runtime = ::tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .expect("failed to build Tokio runtime");
        runtime.block_on(async move #block)
    }};
    guarded_test(item.clone(), secs, body).into()
}

#[proc_macro_attribute]
pub fn timeout(attr: TokenStream, item: TokenStream) -> TokenStream {
    let secs = match deadline_secs(attr) {
        Ok(secs) => secs,
        Err(err) => return err.to_compile_error().into(),
    };
    let item = parse_macro_input!(item as ItemFn);
    if item.sig.asyncness.is_some() {
        return syn::Error::new_spanned(
            &item.sig.ident,
            "use tokio_timeout_test for async tests",
        )
        .to_compile_error()
        .into();
    }

    let block = &item.block;
    let body = quote! { #block };
    guarded_test(item.clone(), secs, body).into()
}
