use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{trace, warn};

use crate::config::{AppConfig, MAX_PAGES_CAP};
use crate::errors::{AppError, AppResult};
use crate::grid::SamplePoint;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawPlace {
    pub place_id: Option<String>,
    pub name: Option<String>,
    pub vicinity: Option<String>,
    pub geometry: Option<RawGeometry>,
    pub rating: Option<f64>,
    pub user_ratings_total: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawGeometry {
    pub location: Option<RawLocation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawLocation {
    pub lat: Option<f64>,
    pub lng: Option<f64>,
}

/// One decoded Nearby Search response page.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NearbyPage {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub results: Option<Vec<RawPlace>>,
    #[serde(default)]
    pub next_page_token: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
}

impl NearbyPage {
    fn failure_reason(&self) -> Option<String> {
        match self.status.as_deref() {
            None | Some("OK") | Some("ZERO_RESULTS") => None,
            Some(status) => Some(match &self.error_message {
                Some(message) => format!("places status {status}: {message}"),
                None => format!("places status {status}"),
            }),
        }
    }

    fn continuation(&self) -> Option<&str> {
        self.next_page_token
            .as_deref()
            .map(str::trim)
            .filter(|token| !token.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PageRequest {
    pub origin: SamplePoint,
    pub radius: u32,
    pub page_token: Option<String>,
}

/// Result of paginating around one sample point.
#[derive(Debug, Clone, PartialEq)]
pub enum SearchOutcome {
    Complete(Vec<RawPlace>),
    /// A request failed; `places` holds every result gathered before it.
    Interrupted {
        places: Vec<RawPlace>,
        reason: String,
    },
}

impl SearchOutcome {
    pub fn places(&self) -> &[RawPlace] {
        match self {
            SearchOutcome::Complete(places) => places,
            SearchOutcome::Interrupted { places, .. } => places,
        }
    }

    pub fn into_places(self) -> Vec<RawPlace> {
        match self {
            SearchOutcome::Complete(places) => places,
            SearchOutcome::Interrupted { places, .. } => places,
        }
    }

    pub fn failure_reason(&self) -> Option<&str> {
        match self {
            SearchOutcome::Complete(_) => None,
            SearchOutcome::Interrupted { reason, .. } => Some(reason),
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, SearchOutcome::Complete(_))
    }
}

#[async_trait]
pub trait NearbySearch: Send + Sync {
    async fn fetch_page(&self, request: &PageRequest) -> AppResult<NearbyPage>;
}

/// Owns the pagination loop around a [`NearbySearch`] backend.
#[derive(Clone)]
pub struct PlacesService {
    inner: Arc<dyn NearbySearch>,
    max_pages: u32,
    page_token_delay: Duration,
}

impl PlacesService {
    pub fn new(config: &AppConfig) -> AppResult<Self> {
        let client = HttpNearbySearch::new(config)?;
        Ok(Self::with_search(
            Arc::new(client),
            config.places_max_pages,
            config.page_token_delay(),
        ))
    }

    pub fn with_search(
        inner: Arc<dyn NearbySearch>,
        max_pages: u32,
        page_token_delay: Duration,
    ) -> Self {
        Self {
            inner,
            max_pages: max_pages.clamp(1, MAX_PAGES_CAP),
            page_token_delay,
        }
    }

    /// Collects every page around `origin`, never failing the caller.
    pub async fn search_nearby(&self, origin: SamplePoint, radius: u32) -> SearchOutcome {
        let mut places = Vec::new();
        let mut request = PageRequest {
            origin,
            radius,
            page_token: None,
        };

        for page in 1..=self.max_pages {
            let response = match self.inner.fetch_page(&request).await {
                Ok(response) => response,
                Err(err) => {
                    warn!(?err, lat = origin.lat, lng = origin.lng, page, "nearby search failed; skipping rest of point");
                    return SearchOutcome::Interrupted {
                        places,
                        reason: err.to_string(),
                    };
                }
            };

            if let Some(reason) = response.failure_reason() {
                warn!(lat = origin.lat, lng = origin.lng, page, %reason, "nearby search rejected; skipping rest of point");
                return SearchOutcome::Interrupted { places, reason };
            }

            let next_token = response.continuation().map(str::to_string);
            let page_results = response.results.unwrap_or_default();
            trace!(page, results = page_results.len(), "nearby search page received");
            places.extend(page_results);

            match next_token {
                Some(token) if page < self.max_pages => {
                    // Page tokens take a moment to become valid upstream.
                    sleep(self.page_token_delay).await;
                    request.page_token = Some(token);
                }
                _ => break,
            }
        }

        SearchOutcome::Complete(places)
    }
}

pub struct HttpNearbySearch {
    http: reqwest::Client,
    endpoint: String,
    api_key: SecretString,
    keyword: String,
    place_type: String,
}

impl HttpNearbySearch {
    pub fn new(config: &AppConfig) -> AppResult<Self> {
        let api_key = config.require_api_key()?;
        let http = reqwest::Client::builder()
            .user_agent(concat!("london-pubs/", env!("CARGO_PKG_VERSION")))
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self {
            http,
            endpoint: config.places_endpoint.clone(),
            api_key,
            keyword: config.places_keyword.clone(),
            place_type: config.places_type.clone(),
        })
    }
}

#[async_trait]
impl NearbySearch for HttpNearbySearch {
    async fn fetch_page(&self, request: &PageRequest) -> AppResult<NearbyPage> {
        let mut query = vec![
            ("location", request.origin.as_location()),
            ("radius", request.radius.to_string()),
            ("keyword", self.keyword.clone()),
            ("type", self.place_type.clone()),
            ("key", self.api_key.expose_secret().to_string()),
        ];
        if let Some(token) = &request.page_token {
            query.push(("pagetoken", token.clone()));
        }

        // Errors are stripped of their URL so the key never reaches the logs.
        let response = self
            .http
            .get(&self.endpoint)
            .query(&query)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|err| AppError::Http(err.without_url()))?;

        response
            .json::<NearbyPage>()
            .await
            .map_err(|err| AppError::Http(err.without_url()))
    }
}

#[cfg(test)]
mod tests {
    use httptest::matchers::{all_of, contains, key, not, request, url_decoded};
    use httptest::responders::{delay_and_then, json_encoded, status_code};
    use httptest::{Expectation, Server};
    use parking_lot::Mutex;
    use serde_json::json;
    use tokio::time::Instant;

    use super::*;

    struct ScriptedSearch {
        pages: Mutex<Vec<AppResult<NearbyPage>>>,
        requests: Mutex<Vec<PageRequest>>,
    }

    impl ScriptedSearch {
        fn new(mut pages: Vec<AppResult<NearbyPage>>) -> Arc<Self> {
            pages.reverse();
            Arc::new(Self {
                pages: Mutex::new(pages),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn requests(&self) -> Vec<PageRequest> {
            self.requests.lock().clone()
        }
    }

    #[async_trait]
    impl NearbySearch for ScriptedSearch {
        async fn fetch_page(&self, request: &PageRequest) -> AppResult<NearbyPage> {
            self.requests.lock().push(request.clone());
            self.pages
                .lock()
                .pop()
                .unwrap_or_else(|| Err(AppError::Config("script exhausted".into())))
        }
    }

    fn place(id: &str) -> RawPlace {
        RawPlace {
            place_id: Some(id.to_string()),
            name: Some(format!("Pub {id}")),
            vicinity: None,
            geometry: None,
            rating: None,
            user_ratings_total: None,
        }
    }

    fn page(ids: &[&str], token: Option<&str>) -> AppResult<NearbyPage> {
        Ok(NearbyPage {
            status: Some("OK".into()),
            results: Some(ids.iter().map(|id| place(id)).collect()),
            next_page_token: token.map(str::to_string),
            error_message: None,
        })
    }

    fn origin() -> SamplePoint {
        SamplePoint {
            lat: 51.5,
            lng: -0.12,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn follows_token_then_stops_after_tokenless_page() {
        let search = ScriptedSearch::new(vec![page(&["a", "b"], Some("tok-1")), page(&["c"], None)]);
        let service = PlacesService::with_search(search.clone(), 3, Duration::from_secs(2));

        let started = Instant::now();
        let outcome = service.search_nearby(origin(), 700).await;

        assert!(started.elapsed() >= Duration::from_secs(2));
        assert!(outcome.is_complete());
        let ids: Vec<_> = outcome
            .places()
            .iter()
            .map(|p| p.place_id.clone().unwrap())
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);

        let requests = search.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].page_token, None);
        assert_eq!(requests[1].page_token.as_deref(), Some("tok-1"));
        assert_eq!(requests[1].radius, 700);
    }

    #[tokio::test(start_paused = true)]
    async fn caps_pagination_at_three_pages() {
        let search = ScriptedSearch::new(vec![
            page(&["a"], Some("t1")),
            page(&["b"], Some("t2")),
            page(&["c"], Some("t3")),
            page(&["d"], None),
        ]);
        let service = PlacesService::with_search(search.clone(), 3, Duration::from_secs(2));

        let outcome = service.search_nearby(origin(), 400).await;

        assert_eq!(outcome.places().len(), 3);
        assert_eq!(search.requests().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn keeps_earlier_pages_when_a_request_fails() {
        let search = ScriptedSearch::new(vec![
            page(&["a", "b"], Some("t1")),
            Err(AppError::Config("connection reset".into())),
        ]);
        let service = PlacesService::with_search(search, 3, Duration::from_secs(2));

        let outcome = service.search_nearby(origin(), 500).await;

        assert_eq!(outcome.failure_reason(), Some("connection reset"));
        assert_eq!(outcome.into_places().len(), 2);
    }

    #[tokio::test]
    async fn treats_error_status_as_interruption() {
        let search = ScriptedSearch::new(vec![Ok(NearbyPage {
            status: Some("REQUEST_DENIED".into()),
            results: Some(Vec::new()),
            next_page_token: None,
            error_message: Some("The provided API key is invalid.".into()),
        })]);
        let service = PlacesService::with_search(search, 3, Duration::ZERO);

        let outcome = service.search_nearby(origin(), 500).await;

        assert!(!outcome.is_complete());
        assert!(outcome.failure_reason().unwrap().contains("REQUEST_DENIED"));
        assert!(outcome.places().is_empty());
    }

    #[tokio::test]
    async fn zero_results_is_a_clean_empty_search() {
        let search = ScriptedSearch::new(vec![Ok(NearbyPage {
            status: Some("ZERO_RESULTS".into()),
            ..NearbyPage::default()
        })]);
        let service = PlacesService::with_search(search, 3, Duration::ZERO);

        let outcome = service.search_nearby(origin(), 500).await;

        assert_eq!(outcome, SearchOutcome::Complete(Vec::new()));
    }

    fn http_config(server: &Server, timeout_ms: u64) -> AppConfig {
        AppConfig {
            google_places_api_key: Some(SecretString::from("test-key".to_string())),
            places_endpoint: server.url("/nearbysearch/json").to_string(),
            page_token_delay_ms: 0,
            request_timeout_ms: timeout_ms,
            ..AppConfig::default()
        }
    }

    #[tokio::test]
    async fn http_client_sends_search_parameters_and_page_token() {
        let server = Server::run();
        server.expect(
            Expectation::matching(all_of![
                request::method_path("GET", "/nearbysearch/json"),
                request::query(url_decoded(contains(("keyword", "pub")))),
                request::query(url_decoded(contains(("type", "point_of_interest")))),
                request::query(url_decoded(contains(("radius", "700")))),
                request::query(url_decoded(contains(("location", "51.5,-0.12")))),
                request::query(url_decoded(contains(("key", "test-key")))),
                request::query(url_decoded(not(contains(key("pagetoken"))))),
            ])
            .respond_with(json_encoded(json!({
                "status": "OK",
                "results": [{
                    "place_id": "p1",
                    "name": "The Lamb",
                    "vicinity": "94 Lamb's Conduit St, London",
                    "geometry": { "location": { "lat": 51.5232, "lng": -0.1186 } },
                    "rating": 4.5,
                    "user_ratings_total": 1200
                }],
                "next_page_token": "tok-1"
            }))),
        );
        server.expect(
            Expectation::matching(all_of![
                request::method_path("GET", "/nearbysearch/json"),
                request::query(url_decoded(contains(("pagetoken", "tok-1")))),
            ])
            .respond_with(json_encoded(json!({ "status": "OK", "results": [] }))),
        );

        let service = PlacesService::new(&http_config(&server, 5_000)).unwrap();
        let outcome = service.search_nearby(origin(), 700).await;

        assert!(outcome.is_complete());
        let places = outcome.into_places();
        assert_eq!(places.len(), 1);
        assert_eq!(places[0].user_ratings_total, Some(1200));
        assert_eq!(
            places[0].geometry.as_ref().and_then(|g| g.location.as_ref()).and_then(|l| l.lat),
            Some(51.5232)
        );
    }

    #[tokio::test]
    async fn http_client_times_out_slow_points() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("GET", "/nearbysearch/json"))
                .respond_with(delay_and_then(
                    Duration::from_millis(500),
                    json_encoded(json!({ "status": "OK", "results": [] })),
                )),
        );

        let service = PlacesService::new(&http_config(&server, 50)).unwrap();
        let outcome = service.search_nearby(origin(), 700).await;

        let reason = outcome.failure_reason().unwrap();
        assert!(!reason.contains("test-key"));
    }

    #[tokio::test]
    async fn http_client_reports_server_errors_and_garbage() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("GET", "/nearbysearch/json"))
                .times(2)
                .respond_with(status_code(503)),
        );
        let service = PlacesService::new(&http_config(&server, 5_000)).unwrap();
        assert!(!service.search_nearby(origin(), 700).await.is_complete());
        assert!(!service.search_nearby(origin(), 700).await.is_complete());

        let garbage = Server::run();
        garbage.expect(
            Expectation::matching(request::method_path("GET", "/nearbysearch/json"))
                .respond_with(status_code(200).body("not json")),
        );
        let service = PlacesService::new(&http_config(&garbage, 5_000)).unwrap();
        assert!(!service.search_nearby(origin(), 700).await.is_complete());
    }

    #[test]
    fn http_client_requires_an_api_key() {
        let config = AppConfig::default();
        assert!(matches!(
            HttpNearbySearch::new(&config),
            Err(AppError::Config(_))
        ));
    }
}
