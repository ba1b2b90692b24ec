use std::sync::Arc;

use serde_json::Value;

use crate::api::{EndpointKey, Resource};
use crate::error::FetchError;
use crate::nav::Page;
use crate::query::{QueryCache, Subscription};
use crate::transform::{
    self, CorrelationChart, CostComparison, CostParams, DepthChart, MetricRow, PredictionPanel,
};

/// What a page needs from the cache and how it turns payloads into something drawable.
pub trait ViewSpec {
    type Params: Clone + PartialEq;
    type Output;

    /// Keys to subscribe for the given parameters, in the order `transform`
    /// receives their payloads.
    fn keys(&self, params: &Self::Params) -> Vec<EndpointKey>;

    fn transform(
        &self,
        payloads: &[Arc<Value>],
        params: &Self::Params,
    ) -> Result<Self::Output, FetchError>;
}

#[derive(Clone, Debug, PartialEq)]
pub enum ViewStatus<T> {
    Loading,
    Failed(FetchError),
    Ready(T),
}

impl<T> ViewStatus<T> {
    pub fn is_loading(&self) -> bool {
        matches!(self, ViewStatus::Loading)
    }
}

/// A [`ViewSpec`] bound to live cache subscriptions and its local parameters.
///
/// The output is derived again from the current cache state on every call to
/// [`BoundView::status`]. Dropping the view drops its subscriptions.
pub struct BoundView<S: ViewSpec> {
    spec: S,
    params: S::Params,
    keys: Vec<EndpointKey>,
    subscriptions: Vec<Subscription>,
}

impl<S: ViewSpec> BoundView<S> {
    pub fn bind(spec: S, params: S::Params, cache: &mut QueryCache) -> Self {
        let keys = spec.keys(&params);
        let subscriptions = keys.iter().map(|key| cache.subscribe(key)).collect();
        BoundView {
            spec,
            params,
            keys,
            subscriptions,
        }
    }

    pub fn params(&self) -> &S::Params {
        &self.params
    }

    pub fn keys(&self) -> &[EndpointKey] {
        &self.keys
    }

    /// Replaces the parameters. When they map to different keys the new keys are
    /// subscribed before the old subscriptions are dropped. Returns whether the
    /// key set changed.
    pub fn set_params(&mut self, params: S::Params, cache: &mut QueryCache) -> bool {
        if params == self.params {
            return false;
        }
        let keys = self.spec.keys(&params);
        self.params = params;
        if keys == self.keys {
            return false;
        }
        let subscriptions: Vec<Subscription> = keys.iter().map(|key| cache.subscribe(key)).collect();
        self.subscriptions = subscriptions;
        self.keys = keys;
        true
    }

    pub fn update_params(
        &mut self,
        cache: &mut QueryCache,
        change: impl FnOnce(&mut S::Params),
    ) -> bool {
        let mut params = self.params.clone();
        change(&mut params);
        self.set_params(params, cache)
    }

    /// True while any subscribed key has a request in flight.
    pub fn is_refreshing(&self) -> bool {
        self.subscriptions
            .iter()
            .any(|subscription| subscription.borrow().is_loading())
    }

    pub fn refresh(&self, cache: &mut QueryCache) {
        for key in &self.keys {
            cache.invalidate(key);
        }
    }

    /// Any failed key fails the view, even while other keys are still loading.
    /// A key being refetched keeps feeding its previous payload.
    pub fn status(&self) -> ViewStatus<S::Output> {
        let mut payloads = Vec::with_capacity(self.subscriptions.len());
        let mut pending = false;
        for subscription in &self.subscriptions {
            let state = subscription.borrow();
            if let Some(err) = state.error() {
                return ViewStatus::Failed(err.clone());
            }
            match state.last_data() {
                Some(value) => payloads.push(Arc::clone(value)),
                None => pending = true,
            }
        }
        if pending {
            return ViewStatus::Loading;
        }
        match self.spec.transform(&payloads, &self.params) {
            Ok(output) => ViewStatus::Ready(output),
            Err(err) => ViewStatus::Failed(err),
        }
    }
}

fn payload_at(payloads: &[Arc<Value>], idx: usize) -> Result<&Value, FetchError> {
    payloads
        .get(idx)
        .map(|value| value.as_ref())
        .ok_or_else(|| FetchError::precondition(format!("missing payload #{idx}")))
}

pub struct CorrelationView;

impl ViewSpec for CorrelationView {
    type Params = ();
    type Output = CorrelationChart;

    fn keys(&self, _params: &()) -> Vec<EndpointKey> {
        vec![
            EndpointKey::new(Resource::BitcoinHistorical),
            EndpointKey::new(Resource::EtfData),
        ]
    }

    fn transform(&self, payloads: &[Arc<Value>], _params: &()) -> Result<CorrelationChart, FetchError> {
        transform::correlation(payload_at(payloads, 0)?, payload_at(payloads, 1)?)
    }
}

pub struct LiquidityView;

/// Index into the symbols of the ETF payload; clamped when the payload is shorter.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SymbolSelection(pub usize);

#[derive(Clone, Debug, PartialEq)]
pub struct LiquidityPanel {
    pub charts: Vec<DepthChart>,
    pub selected: usize,
}

impl LiquidityPanel {
    pub fn current(&self) -> Option<&DepthChart> {
        self.charts.get(self.selected)
    }
}

impl ViewSpec for LiquidityView {
    type Params = SymbolSelection;
    type Output = LiquidityPanel;

    fn keys(&self, _params: &SymbolSelection) -> Vec<EndpointKey> {
        vec![EndpointKey::new(Resource::EtfData)]
    }

    fn transform(
        &self,
        payloads: &[Arc<Value>],
        params: &SymbolSelection,
    ) -> Result<LiquidityPanel, FetchError> {
        let charts = transform::liquidity(payload_at(payloads, 0)?)?;
        let selected = params.0.min(charts.len().saturating_sub(1));
        Ok(LiquidityPanel { charts, selected })
    }
}

pub struct PredictionsView;

impl ViewSpec for PredictionsView {
    type Params = ();
    type Output = PredictionPanel;

    fn keys(&self, _params: &()) -> Vec<EndpointKey> {
        vec![EndpointKey::new(Resource::BitcoinAnalysis)]
    }

    fn transform(&self, payloads: &[Arc<Value>], _params: &()) -> Result<PredictionPanel, FetchError> {
        transform::predictions(payload_at(payloads, 0)?)
    }
}

/// Computed locally; needs nothing from the backend.
pub struct CostsView;

impl ViewSpec for CostsView {
    type Params = CostParams;
    type Output = CostComparison;

    fn keys(&self, _params: &CostParams) -> Vec<EndpointKey> {
        Vec::new()
    }

    fn transform(&self, _payloads: &[Arc<Value>], params: &CostParams) -> Result<CostComparison, FetchError> {
        transform::cost_comparison(params)
    }
}

pub struct RiskView;

impl ViewSpec for RiskView {
    type Params = ();
    type Output = Vec<MetricRow>;

    fn keys(&self, _params: &()) -> Vec<EndpointKey> {
        vec![EndpointKey::new(Resource::RiskMetrics)]
    }

    fn transform(&self, payloads: &[Arc<Value>], _params: &()) -> Result<Vec<MetricRow>, FetchError> {
        transform::risk_table(payload_at(payloads, 0)?)
    }
}

/// The view bound for the page on screen. Parameters start from their defaults
/// each time a page is bound.
pub enum PageView {
    Correlation(BoundView<CorrelationView>),
    Liquidity(BoundView<LiquidityView>),
    Predictions(BoundView<PredictionsView>),
    Costs(BoundView<CostsView>),
    Risk(BoundView<RiskView>),
}

impl PageView {
    pub fn bind(page: Page, cache: &mut QueryCache) -> PageView {
        match page {
            Page::Correlation => PageView::Correlation(BoundView::bind(CorrelationView, (), cache)),
            Page::Liquidity => {
                PageView::Liquidity(BoundView::bind(LiquidityView, SymbolSelection::default(), cache))
            }
            Page::Predictions => PageView::Predictions(BoundView::bind(PredictionsView, (), cache)),
            Page::Costs => PageView::Costs(BoundView::bind(CostsView, CostParams::default(), cache)),
            Page::Risk => PageView::Risk(BoundView::bind(RiskView, (), cache)),
        }
    }

    pub fn page(&self) -> Page {
        match self {
            PageView::Correlation(_) => Page::Correlation,
            PageView::Liquidity(_) => Page::Liquidity,
            PageView::Predictions(_) => Page::Predictions,
            PageView::Costs(_) => Page::Costs,
            PageView::Risk(_) => Page::Risk,
        }
    }

    pub fn keys(&self) -> &[EndpointKey] {
        match self {
            PageView::Correlation(view) => view.keys(),
            PageView::Liquidity(view) => view.keys(),
            PageView::Predictions(view) => view.keys(),
            PageView::Costs(view) => view.keys(),
            PageView::Risk(view) => view.keys(),
        }
    }

    pub fn refresh(&self, cache: &mut QueryCache) {
        match self {
            PageView::Correlation(view) => view.refresh(cache),
            PageView::Liquidity(view) => view.refresh(cache),
            PageView::Predictions(view) => view.refresh(cache),
            PageView::Costs(view) => view.refresh(cache),
            PageView::Risk(view) => view.refresh(cache),
        }
    }

    pub fn is_refreshing(&self) -> bool {
        match self {
            PageView::Correlation(view) => view.is_refreshing(),
            PageView::Liquidity(view) => view.is_refreshing(),
            PageView::Predictions(view) => view.is_refreshing(),
            PageView::Costs(view) => view.is_refreshing(),
            PageView::Risk(view) => view.is_refreshing(),
        }
    }

    pub fn is_loading(&self) -> bool {
        match self {
            PageView::Correlation(view) => view.status().is_loading(),
            PageView::Liquidity(view) => view.status().is_loading(),
            PageView::Predictions(view) => view.status().is_loading(),
            PageView::Costs(view) => view.status().is_loading(),
            PageView::Risk(view) => view.status().is_loading(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::DataSource;
    use crate::command::Command;
    use crate::query::RefetchPolicy;
    use crate::transform::TradeFrequency;
    use futures_util::FutureExt;
    use futures_util::future::BoxFuture;
    use serde_json::json;
    use std::sync::Mutex;
    use tokio::sync::mpsc;
    use tokio::time::{Duration, timeout};

    struct CannedSource {
        requests: Mutex<Vec<EndpointKey>>,
    }

    impl CannedSource {
        fn new() -> Arc<Self> {
            Arc::new(CannedSource {
                requests: Mutex::new(Vec::new()),
            })
        }

        fn requests(&self) -> Vec<EndpointKey> {
            self.requests.lock().unwrap().clone()
        }
    }

    impl DataSource for CannedSource {
        fn fetch(&self, key: &EndpointKey) -> BoxFuture<'static, Result<Value, FetchError>> {
            self.requests.lock().unwrap().push(key.clone());
            let result = match key.resource() {
                Resource::BitcoinHistorical => Ok(json!({"data": [{"Close": 100.0}, {"Close": 101.0}]})),
                Resource::EtfData => Ok(json!({"data": {
                    "IBIT": {"latest_price": 38.5, "orderbook": {
                        "bid_prices": [38.4], "bid_volumes": [10], "ask_prices": [38.6], "ask_volumes": [12]
                    }},
                    "FBTC": {"latest_price": 57.1, "orderbook": {
                        "bid_prices": [57.0], "bid_volumes": [3], "ask_prices": [57.2], "ask_volumes": [4]
                    }}
                }})),
                Resource::RiskMetrics => Err(FetchError::http_status(404)),
                Resource::BitcoinAnalysis => Ok(json!({"data": {"analysis": "not json", "predictions": {}}})),
                Resource::Health => Ok(json!({"status": "healthy"})),
            };
            async move { result }.boxed()
        }
    }

    fn cache_with(source: Arc<CannedSource>) -> (QueryCache, mpsc::UnboundedReceiver<Command>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let policy = RefetchPolicy {
            max_retries: 0,
            ..RefetchPolicy::default()
        };
        (QueryCache::new(source, policy, tx), rx)
    }

    /// Applies outcomes until `count` of them changed a subscribed key.
    async fn settle(cache: &mut QueryCache, rx: &mut mpsc::UnboundedReceiver<Command>, count: usize) {
        let mut applied = 0;
        while applied < count {
            let command = timeout(Duration::from_secs(5), rx.recv())
                .await
                .expect("query did not resolve in time")
                .expect("event channel closed");
            if let Command::QueryResolved(outcome) = command {
                if cache.apply(outcome) {
                    applied += 1;
                }
            }
        }
    }

    struct IntervalView;

    impl ViewSpec for IntervalView {
        type Params = (String, u32);
        type Output = usize;

        fn keys(&self, params: &(String, u32)) -> Vec<EndpointKey> {
            vec![EndpointKey::new(Resource::BitcoinHistorical).with_param("interval", params.0.clone())]
        }

        fn transform(&self, payloads: &[Arc<Value>], _params: &(String, u32)) -> Result<usize, FetchError> {
            Ok(payloads.len())
        }
    }

    #[tokio::test]
    async fn shows_loading_before_data_arrives() {
        let source = CannedSource::new();
        let (mut cache, mut rx) = cache_with(source);
        let view = BoundView::bind(CorrelationView, (), &mut cache);
        assert!(view.status().is_loading());

        settle(&mut cache, &mut rx, 2).await;
        let ViewStatus::Ready(chart) = view.status() else {
            panic!("expected ready view");
        };
        assert_eq!(chart.points(), vec![(100.0, 38.5), (101.0, 57.1)]);
    }

    #[tokio::test]
    async fn fetch_errors_reach_the_view() {
        let source = CannedSource::new();
        let (mut cache, mut rx) = cache_with(source);
        let view = BoundView::bind(RiskView, (), &mut cache);
        settle(&mut cache, &mut rx, 1).await;
        assert_eq!(view.status(), ViewStatus::Failed(FetchError::http_status(404)));
    }

    #[tokio::test]
    async fn transform_failures_reach_the_view() {
        let source = CannedSource::new();
        let (mut cache, mut rx) = cache_with(source);
        let view = BoundView::bind(PredictionsView, (), &mut cache);
        settle(&mut cache, &mut rx, 1).await;
        assert!(matches!(
            view.status(),
            ViewStatus::Failed(FetchError::MalformedResponse { .. })
        ));
    }

    #[tokio::test]
    async fn cost_view_is_ready_without_network() {
        let source = CannedSource::new();
        let (mut cache, _rx) = cache_with(source.clone());
        let mut view = BoundView::bind(CostsView, CostParams::default(), &mut cache);
        assert!(matches!(view.status(), ViewStatus::Ready(_)));

        let changed = view.update_params(&mut cache, |params| {
            params.frequency = TradeFrequency::Daily;
        });
        assert!(!changed);
        let ViewStatus::Ready(result) = view.status() else {
            panic!("expected ready view");
        };
        assert!((result.direct.fee("Trading Fees").unwrap() - 10_000.0 * 0.003 * 252.0 * 5.0).abs() < 1e-6);
        assert!(source.requests().is_empty());
    }

    #[tokio::test]
    async fn symbol_selection_is_local_and_clamped() {
        let source = CannedSource::new();
        let (mut cache, mut rx) = cache_with(source.clone());
        let mut view = BoundView::bind(LiquidityView, SymbolSelection::default(), &mut cache);
        settle(&mut cache, &mut rx, 1).await;

        assert!(!view.set_params(SymbolSelection(7), &mut cache));
        let ViewStatus::Ready(panel) = view.status() else {
            panic!("expected ready view");
        };
        assert_eq!(panel.selected, 1);
        assert_eq!(panel.current().map(|chart| chart.symbol.as_str()), Some("FBTC"));
        assert_eq!(source.requests().len(), 1);
    }

    #[tokio::test]
    async fn key_changing_params_resubscribe_and_drop_the_old_key() {
        let source = CannedSource::new();
        let (mut cache, mut rx) = cache_with(source.clone());
        let mut view = BoundView::bind(IntervalView, ("1d".to_string(), 0), &mut cache);
        let daily = view.keys()[0].clone();
        assert_eq!(cache.subscriber_count(&daily), 1);
        settle(&mut cache, &mut rx, 1).await;

        assert!(!view.set_params(("1d".to_string(), 9), &mut cache));
        assert_eq!(source.requests(), vec![daily.clone()]);
        assert_eq!(view.status(), ViewStatus::Ready(1));

        assert!(view.set_params(("1h".to_string(), 9), &mut cache));
        let hourly = view.keys()[0].clone();
        assert_ne!(daily, hourly);
        assert_eq!(cache.subscriber_count(&daily), 0);
        assert_eq!(cache.subscriber_count(&hourly), 1);
        assert!(view.status().is_loading());

        settle(&mut cache, &mut rx, 1).await;
        assert_eq!(view.status(), ViewStatus::Ready(1));
        assert_eq!(source.requests(), vec![daily, hourly]);
    }

    #[tokio::test]
    async fn refresh_keeps_the_view_ready() {
        let source = CannedSource::new();
        let (mut cache, mut rx) = cache_with(source.clone());
        let view = BoundView::bind(CorrelationView, (), &mut cache);
        settle(&mut cache, &mut rx, 2).await;
        assert!(!view.is_refreshing());

        view.refresh(&mut cache);
        assert!(view.is_refreshing());
        assert!(matches!(view.status(), ViewStatus::Ready(_)));

        settle(&mut cache, &mut rx, 2).await;
        assert!(!view.is_refreshing());
        assert_eq!(source.requests().len(), 4);
    }

    #[tokio::test]
    async fn dropping_a_page_view_releases_its_keys() {
        let source = CannedSource::new();
        let (mut cache, _rx) = cache_with(source);
        let mut view = PageView::bind(Page::Correlation, &mut cache);
        let keys = view.keys().to_vec();
        assert_eq!(view.page(), Page::Correlation);

        view = PageView::bind(Page::Risk, &mut cache);
        assert_eq!(view.page(), Page::Risk);
        for key in &keys {
            assert_eq!(cache.subscriber_count(key), 0);
        }
        assert_eq!(cache.subscriber_count(&EndpointKey::new(Resource::RiskMetrics)), 1);
    }
}
