//! Network primitives used during launch.
//!
//! Provides a fixed-delay retrying HTTP client and a tiered, concurrency-limited
//! internet reachability prober.

pub mod connectivity;
pub mod http_client;

pub use connectivity::{ConnectivityProber, HttpHeadProbe, ProbeConfig, ReachabilityProbe};
pub use http_client::{
    HttpClientError, HttpRequestSpec, HttpResponse, HttpRetryConfig, HttpSender, HttpTransport,
    ReqwestTransport, RetryingHttpClient, TransportError, RAW_BODY_CONTENT_TYPE,
};
