pub mod flatkv;
pub mod http;
pub mod retry;
pub mod url_picker;

pub use flatkv::{url_encode, url_unreserved, FlatKeyValue, PostData};
pub use http::{HttpClient, HttpClientConfig, HttpMethod, RequestOptions};
pub use retry::{query_json, query_json_with, ExhaustedPolicy, RetryPolicy, RetryStatus};
pub use url_picker::BestUrlPicker;
