//! Subcommand implementations.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use fence_map_broadcast::{ChangeBroadcaster, ChangeEvent, EventKind, RelayHub, Subscription};
use fence_map_editor::EditSession;
use fence_map_fence_models::{
    DEFAULT_FENCE_COLOR, FenceId, FenceStatus, NewGeofence, PerimeterId, RuleTemplate,
    StorageCoord,
};
use fence_map_geometry::display::{geojson_to_ring, ring_to_geojson};
use fence_map_geometry::measure::{format_area, format_distance};
use fence_map_geometry::{Measurements, bounding_box_center, ring};
use fence_map_reconcile::{NewFence, ReconciliationController};
use fence_map_store::{FenceStore, MemoryStore, RestStore};

use crate::config::Settings;

type CommandResult = Result<(), Box<dyn std::error::Error>>;

/// Reads a ring from `path`, or from stdin when `path` is `-`.
///
/// Accepts either a JSON array of `[lat, lng]` pairs or a GeoJSON
/// `Polygon` geometry.
fn read_ring(path: &Path) -> Result<Vec<StorageCoord>, Box<dyn std::error::Error>> {
    let text = if path == Path::new("-") {
        std::io::read_to_string(std::io::stdin())?
    } else {
        std::fs::read_to_string(path)?
    };
    parse_ring(&text)
}

fn parse_ring(text: &str) -> Result<Vec<StorageCoord>, Box<dyn std::error::Error>> {
    let value: serde_json::Value = serde_json::from_str(text)?;
    if value.is_array() {
        return Ok(serde_json::from_value(value)?);
    }
    let geometry = geojson::Geometry::from_json_value(value)?;
    Ok(geojson_to_ring(&geometry)?)
}

pub fn measure(path: &Path) -> CommandResult {
    let coordinates = ring::open_ring(&read_ring(path)?);
    ring::validate(&coordinates)?;
    let measurements = Measurements::of_ring(&coordinates);

    println!("Vertices:  {}", coordinates.len());
    println!("Area:      {}", format_area(measurements.area_m2));
    println!("Perimeter: {}", format_distance(measurements.perimeter_m));
    if let Some(center) = bounding_box_center(&coordinates) {
        println!("Center:    {:.6}, {:.6}", center.latitude, center.longitude);
    }
    Ok(())
}

pub fn geojson(path: &Path) -> CommandResult {
    let coordinates = ring::open_ring(&read_ring(path)?);
    ring::validate(&coordinates)?;
    println!("{}", serde_json::to_string_pretty(&ring_to_geojson(&coordinates))?);
    Ok(())
}

pub async fn list(settings: &Settings, fence: Option<i64>) -> CommandResult {
    let store = RestStore::new(&settings.api_url);

    let Some(fence) = fence else {
        let fences = store.list_geofences().await?;
        if fences.is_empty() {
            println!("No fences found.");
            return Ok(());
        }

        println!("{:<8} {:<10} {:<10} NAME", "ID", "STATUS", "COLOR");
        println!("{}", "-".repeat(60));
        for fence in &fences {
            println!(
                "{:<8} {:<10} {:<10} {}",
                fence.id, fence.status, fence.color, fence.name
            );
        }
        println!("\n{} fence(s)", fences.len());
        return Ok(());
    };

    let perimeters = store.list_perimeters(FenceId(fence)).await?;
    println!("{:<8} {:<10} {:<14} {:<12} NAME", "ID", "VERTICES", "AREA", "PERIMETER");
    println!("{}", "-".repeat(70));
    for perimeter in &perimeters {
        let measurements = fence_map_geometry::measure_shape(&perimeter.shape);
        let vertices = perimeter.shape.polygon().map_or(0, <[StorageCoord]>::len);
        println!(
            "{:<8} {:<10} {:<14} {:<12} {}",
            perimeter.id,
            vertices,
            format_area(measurements.area_m2),
            format_distance(measurements.perimeter_m),
            perimeter.name.as_deref().unwrap_or("(unnamed)")
        );
    }
    println!("\n{} perimeter(s)", perimeters.len());
    Ok(())
}

pub async fn save(
    settings: &Settings,
    fence: i64,
    perimeter: Option<i64>,
    path: &Path,
) -> CommandResult {
    let coordinates = read_ring(path)?;
    let store: Arc<dyn FenceStore> = Arc::new(RestStore::new(&settings.api_url));
    let broadcaster = Arc::new(ChangeBroadcaster::new(
        Arc::new(RelayHub::new().transport()),
        settings.broadcaster.clone(),
    ));
    let controller = ReconciliationController::new(store, broadcaster);

    let fence_id = FenceId(fence);
    controller.refresh(fence_id).await?;
    let id = perimeter.map_or(PerimeterId::DRAFT, PerimeterId);
    let saved = controller.save_geometry(fence_id, id, &coordinates).await?;

    println!("Saved perimeter {} on fence {fence_id}", saved.id);
    Ok(())
}

pub async fn address(settings: &Settings, path: &Path) -> CommandResult {
    let coordinates = ring::open_ring(&read_ring(path)?);
    ring::validate(&coordinates)?;
    let Some(center) = bounding_box_center(&coordinates) else {
        return Err("ring has no vertices".into());
    };

    let geocoder = settings.geocoder.as_ref().map(fence_map_geocoder::GeocoderConfig::build);
    if geocoder.is_none() {
        log::warn!("No geocoder configured; set MAPBOX_TOKEN or NOMINATIM_URL");
    }
    let address = fence_map_geocoder::annotate_address(geocoder.as_deref(), center).await;

    println!("{address}");
    Ok(())
}

const DEMO_RING: [StorageCoord; 4] = [
    StorageCoord::new(-23.550, -46.630),
    StorageCoord::new(-23.550, -46.640),
    StorageCoord::new(-23.560, -46.640),
    StorageCoord::new(-23.560, -46.630),
];

fn log_events(name: &'static str, broadcaster: &ChangeBroadcaster) -> Vec<Subscription> {
    [
        EventKind::ConnectSuccess,
        EventKind::FenceCreated,
        EventKind::FenceUpdated,
        EventKind::PerimeterUpdated,
    ]
    .into_iter()
    .map(|kind| broadcaster.on(kind, move |event| println!("[{name}] received {}", describe(event))))
    .collect()
}

fn describe(event: &ChangeEvent) -> String {
    match (event.fence_id(), event.perimeter_id()) {
        (Some(id), _) => format!("{} (fence {id})", event.kind()),
        (_, Some(id)) => format!("{} (perimeter {id})", event.kind()),
        _ => event.kind().to_string(),
    }
}

/// Two clients sharing an in-process store and relay: one draws and edits
/// a fence, the other follows along.
pub async fn demo(settings: &Settings) -> CommandResult {
    let hub = RelayHub::new();
    let store: Arc<dyn FenceStore> = Arc::new(MemoryStore::default());
    let client = || {
        let broadcaster = Arc::new(ChangeBroadcaster::new(
            Arc::new(hub.transport()),
            settings.broadcaster.clone(),
        ));
        ReconciliationController::new(Arc::clone(&store), broadcaster)
    };
    let editor = match &settings.geocoder {
        Some(config) => client().with_geocoder(Arc::from(config.build())),
        None => client(),
    };
    let follower = client();

    let _editor_log = log_events("editor", editor.broadcaster());
    let _follower_log = log_events("follower", follower.broadcaster());
    for controller in [&editor, &follower] {
        if !controller.broadcaster().connect(&settings.broadcaster.endpoint).await {
            return Err("relay refused connection".into());
        }
    }

    let mut session = EditSession::new();
    session.start_drawing()?;
    for vertex in DEMO_RING {
        session.add_vertex(vertex.to_display())?;
    }
    let polygon = session.confirm_draw()?;
    println!(
        "Drew {} vertices: {}, {}",
        polygon.coordinates.len(),
        format_area(polygon.measurements.area_m2),
        format_distance(polygon.measurements.perimeter_m)
    );
    println!("Suggested address: {}", editor.suggest_address(&polygon).await);

    let created = editor
        .create_fence(NewFence {
            fence: NewGeofence {
                name: "Demo fence".to_string(),
                description: None,
                color: DEFAULT_FENCE_COLOR.to_string(),
                status: FenceStatus::Active,
                company_id: None,
                department_id: None,
                created_at: chrono::Utc::now(),
            },
            perimeter_name: Some("Main".to_string()),
            polygon,
            template: RuleTemplate::default(),
        })
        .await?;
    let fence_id = created.geofence.id;

    let mut watch = follower.watch(fence_id);

    session.start_editing(created.perimeter.id, &DEMO_RING)?;
    session.remove_vertex(3)?;
    let saved = editor.save_session(&mut session, fence_id).await?;
    println!("Editor saved perimeter {} as a triangle", saved.id);

    if tokio::time::timeout(Duration::from_secs(5), watch.changed())
        .await
        .is_ok_and(|changed| changed)
    {
        for perimeter in follower.perimeters(fence_id) {
            let measurements = fence_map_geometry::measure_shape(&perimeter.shape);
            println!(
                "Follower sees perimeter {}: {}",
                perimeter.id,
                format_area(measurements.area_m2)
            );
        }
    } else {
        log::warn!("Follower did not refetch fence {fence_id}");
    }

    editor.broadcaster().disconnect();
    follower.broadcaster().disconnect();
    Ok(())
}
