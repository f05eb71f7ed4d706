use super::*;

fn at(text: &str) -> Timestamp {
    parse_timestamp(text).unwrap()
}

fn body(request: &ActionRequest) -> &str {
    core::str::from_utf8(&request.payload).unwrap()
}

#[test]
fn feeding_with_local_span_serializes_start_and_end() {
    let feeding = Feeding::new(
        3,
        FoodType::BreastMilk,
        FeedingMethod::LeftBreast,
        Timing::Span {
            start: at("2024-05-01T10:00:00-04:00"),
            end: at("2024-05-01T10:20:00-04:00"),
        },
    )
    .unwrap();

    let request = build_request(&feeding, "BabyPod", &[]).unwrap();
    assert_eq!(request.resource, Resource::Feeding);
    assert_eq!(
        body(&request),
        r#"{"child":3,"type":"breast milk","method":"left breast","start":"2024-05-01T10:00:00-04:00","end":"2024-05-01T10:20:00-04:00","notes":"BabyPod"}"#
    );
}

#[test]
fn remote_timer_replaces_start_and_end() {
    let sleep = Sleep {
        child_id: 1,
        nap: Some(true),
        timing: Timing::RemoteTimer(88),
    };
    let request = build_request(&sleep, "Nursery", &["woke twice"]).unwrap();
    assert_eq!(request.resource, Resource::Sleep);
    assert_eq!(
        body(&request),
        r#"{"child":1,"nap":true,"timer":88,"notes":"Nursery\nwoke twice"}"#
    );
}

#[test]
fn formula_cannot_be_breastfed() {
    let timing = Timing::RemoteTimer(1);
    assert_eq!(
        Feeding::new(1, FoodType::Formula, FeedingMethod::RightBreast, timing),
        Err(PayloadError::InvalidMethod)
    );
    assert!(Feeding::new(1, FoodType::SolidFood, FeedingMethod::SelfFed, timing).is_ok());
}

#[test]
fn diaper_change_carries_its_own_time() {
    let change = DiaperChange {
        child_id: 2,
        wet: true,
        solid: false,
        time: at("2024-05-01T08:05:00Z"),
    };
    let request = build_request(&change, "BabyPod", &[]).unwrap();
    assert_eq!(request.resource, Resource::DiaperChange);
    assert!(body(&request).contains(r#""wet":true,"solid":false,"time":"2024-05-01T08:05:00+00:00""#));
}

#[test]
fn oversized_notes_are_rejected() {
    let long = [b'x'; PAYLOAD_BYTES];
    let long = core::str::from_utf8(&long).unwrap();
    let tummy = TummyTime {
        child_id: 1,
        timing: Timing::RemoteTimer(5),
    };
    assert_eq!(
        build_request(&tummy, "BabyPod", &[long]),
        Err(PayloadError::TooLarge)
    );
}

#[test]
fn feeding_summary_prefers_end_time() {
    let feeding = Feeding::new(
        1,
        FoodType::Formula,
        FeedingMethod::Bottle,
        Timing::Span {
            start: at("2024-05-01T10:00:00-04:00"),
            end: at("2024-05-01T10:20:00-04:00"),
        },
    )
    .unwrap();
    let request = build_request(&feeding, "BabyPod", &[]).unwrap();

    let summary = FeedingSummary::from_payload(&request.payload, None).unwrap();
    assert_eq!(summary.method, FeedingMethod::Bottle);
    assert_eq!(summary.ended_at, at("2024-05-01T10:20:00-04:00"));
}

#[test]
fn feeding_page_falls_back_to_start() {
    let summary = FeedingSummary::from_page(
        br#"{"count":1,"next":null,"results":[{"id":7,"method":"self fed","start":"2024-05-01T12:00:00Z","end":null,"tags":["a"],"amount":1.5}]}"#,
    )
    .unwrap();
    assert_eq!(summary.method, FeedingMethod::SelfFed);
    assert_eq!(summary.ended_at, at("2024-05-01T12:00:00Z"));
}

#[test]
fn empty_feeding_page_has_no_summary() {
    assert_eq!(
        FeedingSummary::from_page(br#"{"count":0,"next":null,"previous":null,"results":[]}"#),
        None
    );
}

#[test]
fn timer_only_feeding_uses_the_fallback_time() {
    let body = br#"{"method":"bottle","timer":4}"#;
    assert_eq!(FeedingSummary::from_payload(body, None), None);

    let captured = at("2024-05-01T07:45:00-04:00");
    let summary = FeedingSummary::from_payload(body, Some(captured)).unwrap();
    assert_eq!(summary.method, FeedingMethod::Bottle);
    assert_eq!(summary.ended_at, captured);
}

#[test]
fn created_id_reads_only_the_top_level_object() {
    let body = br#"{"child":{"id":3,"first_name":"Ada"},"id":51,"notes":"BabyPod \"v2\""}"#;
    assert_eq!(created_id(body), Some(51));
    assert_eq!(created_id(b""), None);
    assert_eq!(created_id(br#"{"detail":"Not found."}"#), None);
}

#[test]
fn pumping_amount_is_a_json_number() {
    let pumping = Pumping {
        child_id: 1,
        amount: 2.5,
        timing: Timing::RemoteTimer(9),
    };
    let request = build_request(&pumping, "BabyPod", &[]).unwrap();
    assert_eq!(request.resource, Resource::Pumping);
    assert_eq!(
        body(&request),
        r#"{"child":1,"amount":2.5,"timer":9,"notes":"BabyPod"}"#
    );
}

#[test]
fn every_food_type_offers_a_method() {
    for food in FoodType::ALL {
        assert!(!food.methods().is_empty(), "{}", food.label());
        for method in food.methods() {
            let mut buf = [0u8; 32];
            let len = serde_json_core::to_slice(method, &mut buf).unwrap();
            let (back, _) = serde_json_core::from_slice::<FeedingMethod>(&buf[..len]).unwrap();
            assert_eq!(back, *method);
        }
    }
}
