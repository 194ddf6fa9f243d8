use crate::{
    errors::Error,
    http::{request::Request, response::Response, types::Method},
    router::trie::SegmentTrie,
};
use std::{fmt, sync::Arc};

/// A trait for handling HTTP requests and generating responses.
///
/// Implemented for every `Fn(&Request, &mut Response)` closure, so most
/// routes are registered as plain closures. Implement it on a type when a
/// handler carries shared state.
///
/// A handler runs on a worker thread and may run concurrently with itself
/// for different connections. A panic ends the connection without a response.
///
/// # Examples
///
/// Closure
/// ```
/// use mill_web::{Request, Response, Router, StatusCode};
///
/// let mut router = Router::new();
/// router
///     .get("/hello/{name}", |req: &Request, resp: &mut Response| {
///         let name = req.param("name").unwrap_or("stranger");
///         resp.status(StatusCode::Ok).body(format!("Hello, {name}!"));
///     })
///     .unwrap();
/// ```
/// Handler with state
/// ```
/// use mill_web::{Handler, Request, Response, Router};
/// use std::sync::atomic::{AtomicUsize, Ordering};
///
/// #[derive(Default)]
/// struct Counter(AtomicUsize);
///
/// impl Handler for Counter {
///     fn handle(&self, _: &Request, resp: &mut Response) {
///         let count = self.0.fetch_add(1, Ordering::Relaxed) + 1;
///         resp.body(format!("Request #{count}"));
///     }
/// }
///
/// let mut router = Router::new();
/// router.get("/count", Counter::default()).unwrap();
/// ```
pub trait Handler: Send + Sync + 'static {
    /// Fills in `response` for `request`.
    ///
    /// The response starts as `200 OK` with an empty body.
    fn handle(&self, request: &Request, response: &mut Response);
}

impl<F> Handler for F
where
    F: Fn(&Request, &mut Response) + Send + Sync + 'static,
{
    #[inline]
    fn handle(&self, request: &Request, response: &mut Response) {
        self(request, response)
    }
}

/// A registered `(method, template)` pair.
///
/// Equality is structural: both the method and the template text must match.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Route {
    pub method: Method,
    pub path: String,
}

impl Route {
    #[inline]
    pub fn new(method: Method, path: &str) -> Self {
        Self {
            method,
            path: path.to_owned(),
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.path)
    }
}

/// Maps `(method, path)` to a [`Handler`].
///
/// Templates are `/`-separated; a segment written `{name}` matches any single
/// path segment and binds it as a route parameter. At the same depth a
/// static segment wins over a dynamic one.
///
/// All routes are registered before the server starts accepting
/// connections; lookups afterwards take no lock.
///
/// # Examples
/// ```
/// use mill_web::{Method, Request, Response, Router};
///
/// let mut router = Router::new();
/// router
///     .get("/users/{id}", |_: &Request, resp: &mut Response| { resp.body("by id"); })
///     .unwrap()
///     .get("/users/me", |_: &Request, resp: &mut Response| { resp.body("me"); })
///     .unwrap();
///
/// let mut req = Request::new(Method::Get, "/users/me");
/// assert!(router.fetch_route(&mut req).is_some());
/// assert!(req.params().is_empty());
///
/// let mut req = Request::new(Method::Get, "/users/17");
/// assert!(router.fetch_route(&mut req).is_some());
/// assert_eq!(req.param("id"), Some("17"));
///
/// let mut req = Request::new(Method::Post, "/users/17");
/// assert!(router.fetch_route(&mut req).is_none());
/// ```
#[derive(Debug, Default)]
pub struct Router {
    trie: SegmentTrie,
    routes: Vec<Route>,
}

impl Router {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `method` and `template`.
    ///
    /// Registering the same pair again replaces the handler. Fails with
    /// [`Error::InvalidRoute`] when braces do not pair up, a parameter has no
    /// name, or a second, differently named parameter would sit next to an
    /// existing one.
    pub fn add_route<H: Handler>(
        &mut self,
        method: Method,
        template: &str,
        handler: H,
    ) -> Result<&mut Self, Error> {
        self.add_shared(method, template, Arc::new(handler))
    }

    pub(crate) fn add_shared(
        &mut self,
        method: Method,
        template: &str,
        handler: Arc<dyn Handler>,
    ) -> Result<&mut Self, Error> {
        if !method.is_valid() {
            return Err(Error::InvalidArgument(format!(
                "route `{template}` needs a valid method"
            )));
        }

        self.trie.insert(method, template, handler)?;

        let route = Route::new(method, template);
        if !self.routes.contains(&route) {
            self.routes.push(route);
        }
        Ok(self)
    }

    /// Resolves `request` and binds its route parameters.
    ///
    /// Parameters are written to the request only when a handler is found.
    pub fn fetch_route(&self, request: &mut Request) -> Option<&dyn Handler> {
        let (handler, params) = self.trie.lookup(request.method, &request.path)?;
        let params = params
            .into_iter()
            .map(|(name, value)| (name.to_owned(), value.to_owned()))
            .collect();

        request.params = params;
        Some(handler)
    }

    /// Every registered route, in registration order.
    #[inline]
    pub fn routes(&self) -> impl Iterator<Item = &Route> {
        self.routes.iter()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

macro_rules! method_routes {
    ($($name:ident => $method:ident),* $(,)?) => {
        impl Router { $(
            #[doc = concat!("Shorthand for [`add_route`](Self::add_route) with `", stringify!($method), "`.")]
            #[inline]
            pub fn $name<H: Handler>(&mut self, template: &str, handler: H) -> Result<&mut Self, Error> {
                self.add_route(Method::$method, template, handler)
            }
        )* }
    };
}

method_routes! {
    get => Get,
    head => Head,
    post => Post,
    put => Put,
    delete => Delete,
    connect => Connect,
    options => Options,
    trace => Trace,
    patch => Patch,
}
