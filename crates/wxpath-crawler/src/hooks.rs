use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use futures::future::{BoxFuture, LocalBoxFuture};
use tokio::runtime::Handle;
use wxpath_html::HtmlDom;

use crate::error::Error;
use crate::value::Value;

/// Outcome of one transformer: a replacement value, or a drop sentinel that
/// halts the rest of the chain and suppresses the value.
pub enum HookAction<T> {
    Keep(T),
    Drop,
}

/// Crawl context handed to every hook.
#[derive(Debug, Clone)]
pub struct TaskInfo {
    pub url: String,
    pub backlink: Option<String>,
    pub depth: usize,
}

type FetchFn = dyn Fn(Vec<u8>, &TaskInfo) -> HookAction<Vec<u8>> + Send + Sync;
type FetchFut = dyn Fn(Vec<u8>, TaskInfo) -> BoxFuture<'static, HookAction<Vec<u8>>> + Send + Sync;
type ParseFn = dyn Fn(&mut HtmlDom, &TaskInfo) -> HookAction<()> + Send + Sync;
// The DOM is not Send (tendril-backed), so the parse-hook future stays on
// the worker thread and is driven through the runtime handle.
type ParseFut =
    dyn for<'a> Fn(&'a mut HtmlDom, TaskInfo) -> LocalBoxFuture<'a, HookAction<()>> + Send + Sync;
type ExtractFn = dyn Fn(Value, &TaskInfo) -> HookAction<Value> + Send + Sync;
type ExtractFut = dyn Fn(Value, TaskInfo) -> BoxFuture<'static, HookAction<Value>> + Send + Sync;

#[derive(Clone)]
pub enum FetchHook {
    Blocking(Arc<FetchFn>),
    Suspending(Arc<FetchFut>),
}

#[derive(Clone)]
pub enum ParseHook {
    Blocking(Arc<ParseFn>),
    Suspending(Arc<ParseFut>),
}

#[derive(Clone)]
pub enum ExtractHook {
    Blocking(Arc<ExtractFn>),
    Suspending(Arc<ExtractFut>),
}

/// The three transformation chains of the result pipeline, run in
/// registration order. All registered hooks must share one synchrony mode;
/// [`validate`](Hooks::validate) rejects mixed runs at engine start.
#[derive(Clone, Default)]
pub struct Hooks {
    post_fetch: Vec<FetchHook>,
    post_parse: Vec<ParseHook>,
    post_extract: Vec<ExtractHook>,
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a blocking transformer over the raw response body.
    pub fn post_fetch<F>(mut self, f: F) -> Self
    where
        F: Fn(Vec<u8>, &TaskInfo) -> HookAction<Vec<u8>> + Send + Sync + 'static,
    {
        self.post_fetch.push(FetchHook::Blocking(Arc::new(f)));
        self
    }

    pub fn post_fetch_async<F>(mut self, f: F) -> Self
    where
        F: Fn(Vec<u8>, TaskInfo) -> BoxFuture<'static, HookAction<Vec<u8>>> + Send + Sync + 'static,
    {
        self.post_fetch.push(FetchHook::Suspending(Arc::new(f)));
        self
    }

    /// Registers a blocking transformer over the parsed DOM, before any
    /// segment runs.
    pub fn post_parse<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut HtmlDom, &TaskInfo) -> HookAction<()> + Send + Sync + 'static,
    {
        self.post_parse.push(ParseHook::Blocking(Arc::new(f)));
        self
    }

    pub fn post_parse_async<F>(mut self, f: F) -> Self
    where
        F: for<'a> Fn(&'a mut HtmlDom, TaskInfo) -> LocalBoxFuture<'a, HookAction<()>>
            + Send
            + Sync
            + 'static,
    {
        self.post_parse.push(ParseHook::Suspending(Arc::new(f)));
        self
    }

    /// Registers a blocking transformer over every extracted datum.
    pub fn post_extract<F>(mut self, f: F) -> Self
    where
        F: Fn(Value, &TaskInfo) -> HookAction<Value> + Send + Sync + 'static,
    {
        self.post_extract.push(ExtractHook::Blocking(Arc::new(f)));
        self
    }

    pub fn post_extract_async<F>(mut self, f: F) -> Self
    where
        F: Fn(Value, TaskInfo) -> BoxFuture<'static, HookAction<Value>> + Send + Sync + 'static,
    {
        self.post_extract.push(ExtractHook::Suspending(Arc::new(f)));
        self
    }

    /// All hooks of one run must share a synchrony mode.
    pub(crate) fn validate(&self) -> Result<(), Error> {
        let blocking = self
            .post_fetch
            .iter()
            .map(|h| matches!(h, FetchHook::Blocking(_)))
            .chain(
                self.post_parse
                    .iter()
                    .map(|h| matches!(h, ParseHook::Blocking(_))),
            )
            .chain(
                self.post_extract
                    .iter()
                    .map(|h| matches!(h, ExtractHook::Blocking(_))),
            );
        let mut modes = blocking.collect::<Vec<_>>();
        modes.dedup();
        if modes.len() > 1 {
            return Err(Error::Config(
                "mixed blocking and suspending hooks in one run".into(),
            ));
        }
        Ok(())
    }

    pub(crate) fn run_post_fetch(
        &self,
        handle: &Handle,
        mut body: Vec<u8>,
        info: &TaskInfo,
    ) -> Option<Vec<u8>> {
        for hook in &self.post_fetch {
            let action = guard(info, || match hook {
                FetchHook::Blocking(f) => f(body.clone(), info),
                FetchHook::Suspending(f) => handle.block_on(f(body.clone(), info.clone())),
            })?;
            match action {
                HookAction::Keep(next) => body = next,
                HookAction::Drop => return None,
            }
        }
        Some(body)
    }

    pub(crate) fn run_post_parse(
        &self,
        handle: &Handle,
        dom: &mut HtmlDom,
        info: &TaskInfo,
    ) -> Option<()> {
        for hook in &self.post_parse {
            let action = guard(info, || match hook {
                ParseHook::Blocking(f) => f(dom, info),
                ParseHook::Suspending(f) => handle.block_on(f(dom, info.clone())),
            })?;
            match action {
                HookAction::Keep(()) => {}
                HookAction::Drop => return None,
            }
        }
        Some(())
    }

    pub(crate) fn run_post_extract(
        &self,
        handle: &Handle,
        mut value: Value,
        info: &TaskInfo,
    ) -> Option<Value> {
        for hook in &self.post_extract {
            let action = guard(info, || match hook {
                ExtractHook::Blocking(f) => f(value.clone(), info),
                ExtractHook::Suspending(f) => handle.block_on(f(value.clone(), info.clone())),
            })?;
            match action {
                HookAction::Keep(next) => value = next,
                HookAction::Drop => return None,
            }
        }
        Some(value)
    }
}

/// Runs one hook, absorbing panics: a panicking hook drops the datum with a
/// logged warning and the run continues.
fn guard<T>(info: &TaskInfo, f: impl FnOnce() -> T) -> Option<T> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(v) => Some(v),
        Err(_) => {
            log::warn!("Hook panicked for {}, dropping its datum", info.url);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_modes_pass_validation() {
        let hooks = Hooks::new()
            .post_fetch(|body, _| HookAction::Keep(body))
            .post_extract(|v, _| HookAction::Keep(v));
        assert!(hooks.validate().is_ok());
    }

    #[test]
    fn mixed_modes_are_rejected() {
        let hooks = Hooks::new()
            .post_fetch(|body, _| HookAction::Keep(body))
            .post_extract_async(|v, _| Box::pin(async move { HookAction::Keep(v) }));
        assert!(matches!(hooks.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn empty_registration_is_uniform() {
        assert!(Hooks::new().validate().is_ok());
    }
}
