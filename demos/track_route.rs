//! Track a simulated vehicle along two opposite directions of one street.
//!
//! Run with: cargo run --example track_route

use route_notifier::{
    sink_fn, Direction, DirectionConfig, Geo, GeoConfig, NotificationZone, TriggerKind,
};

fn main() {
    // A short street in London, driven in both directions
    let street = vec![
        (51.5074, -0.1278),
        (51.5080, -0.1290),
        (51.5090, -0.1300),
        (51.5100, -0.1310),
        (51.5110, -0.1320),
    ];
    let mut reversed = street.clone();
    reversed.reverse();

    let config = DirectionConfig::default();
    let mut outbound = Direction::from_coordinates("outbound", &street, config.clone()).unwrap();
    let inbound = Direction::from_coordinates("inbound", &reversed, config).unwrap();

    let sink = sink_fn(|kind, event| {
        let verb = match kind {
            TriggerKind::Entry => "approaching",
            TriggerKind::Leave => "left",
        };
        println!(
            "   >> {} {} on {} (neighbour: {})",
            verb,
            event.notification.id(),
            event.direction.id(),
            event.neighbour.map(|n| n.id()).unwrap_or("-")
        );
    });

    let zone = NotificationZone::new(60.0, 10.0, 60.0);
    outbound
        .add_notification("stop-a", "stops", 51.5080, -0.1290, zone, Some(sink.clone()))
        .unwrap();
    outbound
        .add_notification("stop-b", "stops", 51.5100, -0.1310, zone, Some(sink))
        .unwrap();

    println!("Directions:");
    println!("  outbound: {} points, {:.0}m", outbound.points().len(), outbound.length());
    println!("  inbound:  {} points, {:.0}m\n", inbound.points().len(), inbound.length());

    let mut geo = Geo::new(GeoConfig {
        buffer_limit: 4,
        adjustment_layer: Some("stops".to_string()),
        ..Default::default()
    });
    geo.add_direction(inbound);
    geo.add_direction(outbound);

    // Walk the outbound route points with a bit of sideways noise, 3 s apart
    let track: Vec<(f64, f64)> = geo
        .direction("outbound")
        .map(|d| {
            d.points()
                .iter()
                .step_by(2)
                .enumerate()
                .map(|(i, p)| {
                    let noise = if i % 2 == 0 { 0.00003 } else { -0.00003 };
                    (p.point().lat(), p.point().lng() + noise)
                })
                .collect()
        })
        .unwrap_or_default();

    println!("Pings:");
    for (i, (lat, lng)) in track.iter().enumerate() {
        match geo.ping_at(*lat, *lng, i as f64 * 3.0) {
            Ok(point) => {
                let matched = point.route_match().unwrap();
                print!(
                    "  #{:<3} {:>6.1}m on {:<8} (off by {:.1}m)",
                    i, matched.position, matched.direction_id, matched.distance
                );
                if let Some(adjusted) = point.adjusted() {
                    print!("  snapped to {:.5}, {:.5}", adjusted.lat(), adjusted.lng());
                }
                println!();
            }
            Err(err) => println!("  #{:<3} {}", i, err),
        }
    }
}
