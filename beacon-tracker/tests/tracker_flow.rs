//! Tracking calls end to end: gate, builder, dispatcher and transport.

use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

use beacon_core::{
    Category, Clock, EcommerceItem, EcommerceOrder, Environment, MemoryCookieJar, MockClock,
    MockTimerBackend, Scope, StaticEnvironment, TimerEvent, TrackerConfig, VisibilityState,
};
use beacon_tracker::events::heartbeat::TIMER_ID;
use beacon_tracker::{
    Anchor, FailureMode, Host, LinkKind, PointerEventKind, RecordingTransport, Registry, Tracker,
    TransportKind,
};

/// Page whose visibility can change during a test
struct Page {
    inner: StaticEnvironment,
    visibility: Cell<Option<VisibilityState>>,
}

impl Page {
    fn new(href: &str) -> Self {
        let inner = StaticEnvironment::for_page(href).with_title("Products");
        Self {
            visibility: Cell::new(Some(VisibilityState::Visible)),
            inner,
        }
    }
}

impl Environment for Page {
    fn user_agent(&self) -> String {
        self.inner.user_agent.clone()
    }

    fn platform(&self) -> String {
        self.inner.platform.clone()
    }

    fn href(&self) -> String {
        self.inner.href.clone()
    }

    fn host(&self) -> String {
        self.inner.host.clone()
    }

    fn title(&self) -> String {
        self.inner.title.clone()
    }

    fn visibility_state(&self) -> Option<VisibilityState> {
        self.visibility.get()
    }

    fn screen_size(&self) -> (u32, u32) {
        (self.inner.screen_width, self.inner.screen_height)
    }

    fn cookies_enabled(&self) -> Option<bool> {
        Some(true)
    }
}

struct Browser {
    clock: MockClock,
    page: Rc<Page>,
    transport: RecordingTransport,
    timers: Rc<MockTimerBackend>,
    registry: Registry,
}

impl Browser {
    fn new() -> Self {
        let clock = MockClock::default();
        let page = Rc::new(Page::new("http://example.com/products"));
        let transport = RecordingTransport::new();
        let timers = Rc::new(MockTimerBackend::new());
        let registry = Registry::new(Host {
            env: page.clone(),
            clock: Rc::new(clock.clone()),
            cookies: Rc::new(MemoryCookieJar::new(Rc::new(clock.clone()))),
            transport: Rc::new(transport.clone()),
            timers: timers.clone(),
        });
        Self {
            clock,
            page,
            transport,
            timers,
            registry,
        }
    }

    fn tracker(&self) -> Rc<Tracker> {
        self.registry.tracker("https://stats.example.com/piwik.php", "1")
    }
}

fn param<'a>(request: &'a str, name: &str) -> Option<&'a str> {
    request
        .split('&')
        .find_map(|pair| pair.strip_prefix(name).and_then(|rest| rest.strip_prefix('=')))
}

#[tokio::test]
async fn test_post_error_falls_back_to_identical_pixel() {
    let browser = Browser::new();
    let tracker = browser.tracker();
    tracker.set_request_method("POST");
    browser
        .transport
        .fail(TransportKind::Post, FailureMode::Error("request blocked".to_string()));

    let calls = Rc::new(Cell::new(0));
    let counter = calls.clone();
    tracker
        .track_link(
            "https://partner.org/",
            LinkKind::Link,
            None,
            Some(Box::new(move || counter.set(counter.get() + 1))),
        )
        .await;

    let sent = browser.transport.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].kind, TransportKind::Post);
    assert_eq!(sent[1].kind, TransportKind::Pixel);
    assert_eq!(sent[0].body, sent[1].body);
    assert!(sent[1].body.starts_with("link=https%3A%2F%2Fpartner.org%2F&idsite=1"));
    assert_eq!(calls.get(), 1);

    // A callback means no link tracking pause
    assert_eq!(browser.registry.lifecycle().unload_deadline(), browser.clock.now_millis());
}

#[tokio::test]
async fn test_do_not_track_sends_nothing_but_completes() {
    let browser = Browser::new();
    let tracker = browser.tracker();
    tracker.set_do_not_track(true);
    assert!(!tracker.do_not_track());

    let env = StaticEnvironment::for_page("http://example.com/").with_do_not_track("1");
    let registry = Registry::new(Host {
        env: Rc::new(env),
        ..browser.registry.host().clone()
    });
    let tracker = registry.tracker("https://stats.example.com/piwik.php", "1");
    tracker.set_do_not_track(true);

    let done = Rc::new(Cell::new(false));
    let flag = done.clone();
    tracker.track_page_view(None, None).await;
    tracker
        .track_link("https://partner.org/", LinkKind::Link, None, Some(Box::new(move || flag.set(true))))
        .await;

    assert!(browser.transport.is_empty());
    assert!(done.get());
}

#[tokio::test]
async fn test_pre_rendered_calls_wait_for_visibility() {
    let browser = Browser::new();
    let tracker = browser.tracker();
    browser.page.visibility.set(Some(VisibilityState::Prerender));

    tracker.track_page_view(None, None).await;
    tracker.track_event("Video", "play", None, None).await;
    assert!(browser.transport.is_empty());
    assert_eq!(tracker.pending_calls(), 2);

    browser.page.visibility.set(Some(VisibilityState::Visible));
    tracker.on_visibility_change().await;

    let bodies = browser.transport.bodies();
    assert_eq!(bodies.len(), 2);
    assert!(bodies[0].starts_with("action_name=Products&"));
    assert!(bodies[1].starts_with("e_c=Video&e_a=play&"));
    assert_eq!(tracker.pending_calls(), 0);
}

#[tokio::test]
async fn test_count_pre_rendered_sends_immediately() {
    let browser = Browser::new();
    let tracker = browser.tracker();
    tracker.set_count_pre_rendered(true);
    browser.page.visibility.set(Some(VisibilityState::Prerender));

    tracker.track_goal("1", None, None).await;
    assert_eq!(browser.transport.len(), 1);
}

#[tokio::test]
async fn test_heartbeat_pings_while_active() {
    let browser = Browser::new();
    let tracker = browser.tracker();
    tracker.set_heartbeat_timer(30, 15);
    tracker
        .track_page_view(None, Some(serde_json::json!({"layout": "grid"})))
        .await;
    browser.transport.clear();

    let fire = |secs_active: u64, secs_after: u64| {
        browser.clock.advance(Duration::from_secs(secs_active));
        tracker.record_activity();
        browser.clock.advance(Duration::from_secs(secs_after));
        browser.timers.take(TIMER_ID).map(|t| t.event)
    };

    // Active, but the minimum visit time has not passed yet
    let event = fire(10, 5).expect("heartbeat scheduled");
    tracker.on_timer(event).await;
    assert!(browser.transport.is_empty());

    let event = fire(10, 5).expect("heartbeat rescheduled");
    tracker.on_timer(event).await;
    assert!(browser.transport.is_empty());

    let event = fire(10, 5).expect("heartbeat rescheduled");
    tracker.on_timer(event).await;
    let bodies = browser.transport.bodies();
    assert_eq!(bodies.len(), 1);
    assert!(bodies[0].starts_with("ping=1&idsite=1"));
    assert_eq!(param(&bodies[0], "data"), Some("%7B%22layout%22%3A%22grid%22%7D"));

    // A quiet interval stops the heartbeat for good
    browser.clock.advance(Duration::from_secs(15));
    let event = browser.timers.take(TIMER_ID).expect("heartbeat rescheduled").event;
    tracker.on_timer(event).await;
    assert_eq!(browser.transport.len(), 1);
    assert!(browser.timers.get_timer(TIMER_ID).is_none());
    assert!(!tracker.heartbeat_running());

    tracker.on_timer(TimerEvent::Heartbeat).await;
    assert_eq!(browser.transport.len(), 1);
}

#[tokio::test]
async fn test_link_clicks_tracked_after_load() {
    let browser = Browser::new();
    let tracker = browser.tracker();
    let outlink = Anchor {
        id: 1,
        href: "https://Partner.ORG/a%20b".to_string(),
        host: Some("Partner.ORG".to_string()),
        class_name: String::new(),
    };

    tracker.enable_link_tracking(false);
    assert!(!tracker.link_tracking_enabled());
    assert!(!tracker.handle_pointer_event(PointerEventKind::Click, 1, Some(&outlink)).await);

    browser.registry.on_load();
    assert!(tracker.link_tracking_enabled());
    assert!(tracker.handle_pointer_event(PointerEventKind::Click, 1, Some(&outlink)).await);

    let internal = Anchor {
        id: 2,
        href: "http://example.com/about".to_string(),
        host: None,
        class_name: String::new(),
    };
    assert!(!tracker.handle_pointer_event(PointerEventKind::Click, 1, Some(&internal)).await);

    let download = Anchor {
        id: 3,
        href: "http://example.com/files/report.pdf".to_string(),
        host: None,
        class_name: String::new(),
    };
    assert!(tracker.handle_pointer_event(PointerEventKind::Click, 1, Some(&download)).await);

    let bodies = browser.transport.bodies();
    assert_eq!(bodies.len(), 2);
    assert!(bodies[0].starts_with("link=https%3A%2F%2Fpartner.org%2Fa%20b&"));
    assert!(bodies[1].starts_with("download=http%3A%2F%2Fexample.com%2Ffiles%2Freport.pdf&"));
    assert_eq!(
        browser.registry.lifecycle().unload_deadline(),
        browser.clock.now_millis() + 500
    );
}

#[tokio::test]
async fn test_ecommerce_order_records_timestamp() {
    let browser = Browser::new();
    let tracker = browser.tracker();

    let mut shoe = EcommerceItem::new("SKU1");
    shoe.name = Some("Shoe".to_string());
    shoe.price = Some(10.5);
    tracker.add_ecommerce_item(shoe);

    tracker.track_ecommerce_order(EcommerceOrder::default()).await;
    assert!(browser.transport.is_empty());

    let order = EcommerceOrder {
        id: "A-1".to_string(),
        grand_total: 12.5,
        shipping: Some(2.0),
        ..EcommerceOrder::default()
    };
    tracker.track_ecommerce_order(order.clone()).await;
    let first_order_at = browser.clock.now_seconds();
    assert_eq!(tracker.visitor_info().last_ecommerce_order_at, Some(first_order_at));

    browser.clock.advance(Duration::from_secs(60));
    tracker.track_ecommerce_cart_update(3.0).await;
    tracker.track_ecommerce_order(order).await;

    let bodies = browser.transport.bodies();
    assert_eq!(bodies.len(), 3);
    assert!(bodies[0].starts_with(
        "idgoal=0&ec_id=A-1&revenue=12.5&ec_sh=2&ec_items=%5B%5B%22SKU1%22%2C%22Shoe%22%2C%22%22%2C10.5%2C1%5D%5D&"
    ));
    assert!(param(&bodies[0], "_ects").is_none());

    assert!(bodies[1].starts_with("idgoal=0&revenue=3&ec_items="));
    assert_eq!(param(&bodies[1], "_ects"), Some(first_order_at.to_string().as_str()));
    assert_eq!(
        tracker.visitor_info().last_ecommerce_order_at,
        Some(first_order_at + 60)
    );
}

#[tokio::test]
async fn test_product_view_sets_page_variables() {
    let browser = Browser::new();
    let tracker = browser.tracker();
    tracker.set_ecommerce_view(
        Some("SKU1"),
        Some("Shoe"),
        Some(&Category::List(vec!["Shoes".to_string(), "Sale".to_string()])),
        Some(20.0),
    );
    assert_eq!(
        tracker.custom_variable(5, Scope::Page),
        Some(("_pkc".to_string(), r#"["Shoes","Sale"]"#.to_string()))
    );

    tracker.track_page_view(None, None).await;
    let body = &browser.transport.bodies()[0];
    let cvar = beacon_core::url::decode(param(body, "cvar").unwrap());
    assert_eq!(
        cvar,
        r#"{"2":["_pkp","20"],"3":["_pks","SKU1"],"4":["_pkn","Shoe"],"5":["_pkc","[\"Shoes\",\"Sale\"]"]}"#
    );
}

#[tokio::test]
async fn test_site_search_parameters() {
    let browser = Browser::new();
    let tracker = browser.tracker();
    tracker.track_site_search("red shoes", Some("catalog"), Some(12)).await;
    tracker.track_site_search("boots", None, None).await;

    let bodies = browser.transport.bodies();
    assert!(bodies[0].starts_with("search=red%20shoes&search_cat=catalog&search_count=12&idsite="));
    assert!(bodies[1].starts_with("search=boots&idsite="));
}
