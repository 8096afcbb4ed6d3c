//! Test attributes that fail a test which runs past its deadline.
//!
//! ```ignore
//! #[test_timeout::timeout]                       // sync test, 60s
//! #[test_timeout::tokio_timeout_test(5)]         // async test on a current-thread runtime, 5s
//! #[test_timeout::tokio_timeout_test(5, paused)] // same, with tokio time paused
//! ```
//!
//! Async tests need `tokio` with the `rt` and `time` features in the calling
//! crate; `paused` additionally needs `test-util`. The test body runs on its
//! own thread so a deadlock is reported as a timeout instead of hanging the
//! harness.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::parse::Parser;
use syn::punctuated::Punctuated;
use syn::{parse_macro_input, Attribute, Expr, ItemFn, Lit, Token};

const DEFAULT_TIMEOUT_SECS: u64 = 60;

struct TimeoutArgs {
    secs: u64,
    paused: bool,
}

impl TimeoutArgs {
    fn parse(attr: TokenStream, allow_paused: bool) -> syn::Result<Self> {
        let mut args = TimeoutArgs {
            secs: DEFAULT_TIMEOUT_SECS,
            paused: false,
        };
        let exprs = Punctuated::<Expr, Token![,]>::parse_terminated.parse(attr)?;
        for expr in exprs {
            match &expr {
                Expr::Lit(lit) => match &lit.lit {
                    Lit::Int(int) => {
                        let secs: u64 = int.base10_parse()?;
                        if secs == 0 {
                            return Err(syn::Error::new_spanned(
                                int,
                                "timeout must be greater than zero",
                            ));
                        }
                        args.secs = secs;
                    }
                    other => {
                        return Err(syn::Error::new_spanned(
                            other,
                            "expected the timeout in seconds",
                        ))
                    }
                },
                Expr::Path(path) if allow_paused && path.path.is_ident("paused") => {
                    args.paused = true
                }
                other => {
                    let expected = if allow_paused {
                        "expected `<seconds>` or `paused`"
                    } else {
                        "expected `<seconds>`"
                    };
                    return Err(syn::Error::new_spanned(other, expected));
                }
            }
        }
        Ok(args)
    }
}

#[proc_macro_attribute]
pub fn tokio_timeout_test(attr: TokenStream, item: TokenStream) -> TokenStream {
    let args = match TimeoutArgs::parse(attr, true) {
        Ok(args) => args,
        Err(err) => return err.to_compile_error().into(),
    };
    let ItemFn {
        attrs,
        vis,
        mut sig,
        block,
    } = parse_macro_input!(item as ItemFn);

    if sig.asyncness.take().is_none() {
        return syn::Error::new_spanned(
            &sig.ident,
            "tokio_timeout_test can only be applied to async functions",
        )
        .to_compile_error()
        .into();
    }

    let pause = if args.paused {
        quote! { .start_paused(true) }
    } else {
        TokenStream2::new()
    };
    let secs = args.secs;
    let body = quote! {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            #pause
            .build()
            .expect("failed to build test runtime");
        runtime.block_on(async move #block)
    };
    let attrs = strip_test_markers(attrs);
    watchdog(quote! { #(#attrs)* #vis #sig }, secs, body).into()
}

#[proc_macro_attribute]
pub fn timeout(attr: TokenStream, item: TokenStream) -> TokenStream {
    let args = match TimeoutArgs::parse(attr, false) {
        Ok(args) => args,
        Err(err) => return err.to_compile_error().into(),
    };
    let ItemFn {
        attrs,
        vis,
        sig,
        block,
    } = parse_macro_input!(item as ItemFn);

    if sig.asyncness.is_some() {
        return syn::Error::new_spanned(
            &sig.ident,
            "timeout expects a synchronous test; use tokio_timeout_test for async ones",
        )
        .to_compile_error()
        .into();
    }

    let attrs = strip_test_markers(attrs);
    watchdog(quote! { #(#attrs)* #vis #sig }, args.secs, quote! { #block }).into()
}

/// Runs `body` on its own thread and fails the test if it has not reported
/// back within `secs`.
fn watchdog(signature: TokenStream2, secs: u64, body: TokenStream2) -> TokenStream2 {
    quote! {
        #[test]
        #signature {
            let deadline = std::time::Duration::from_secs(#secs);
            let (done_tx, done_rx) = std::sync::mpsc::channel();
            std::thread::spawn(move || {
                let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| { #body }));
                let _ = done_tx.send(outcome);
            });
            match done_rx.recv_timeout(deadline) {
                Ok(Ok(_)) => {}
                Ok(Err(payload)) => std::panic::resume_unwind(payload),
                Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {
                    panic!("test exceeded {}s deadline", #secs)
                }
                Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => {
                    panic!("test thread exited without reporting")
                }
            }
        }
    }
}

/// `#[test]` and `#[tokio::test]` would duplicate the harness registration.
fn strip_test_markers(attrs: Vec<Attribute>) -> Vec<Attribute> {
    attrs
        .into_iter()
        .filter(|attr| {
            let path = attr.path();
            if path.is_ident("test") {
                return false;
            }
            let mut segments = path.segments.iter();
            !matches!(
                (segments.next(), segments.next(), segments.next()),
                (Some(first), Some(second), None)
                    if first.ident == "tokio" && second.ident == "test"
            )
        })
        .collect()
}
