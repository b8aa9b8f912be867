//! Logs a small animated point cloud to a file and prints its static view.
//!
//! ```sh
//! cargo run -p vislog --example points -- /tmp/points.vlog
//! ```

use std::path::PathBuf;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use vislog::{
    Archetype, ComponentBatch, ComponentDescriptor, EntityPath, RecordingStreamBuilder, StaticView,
    TextLogLayer, ValueTypeTag,
};

fn main() -> anyhow::Result<()> {
    let path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| std::env::temp_dir().join("points.vlog"));

    let rec = RecordingStreamBuilder::new("points_example")
        .log_time(true)
        .save(&path)?;

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().compact())
        .with(TextLogLayer::new(rec.clone(), EntityPath::parse("logs")?))
        .init();

    rec.log_static(
        "world",
        &Archetype::builder("ViewCoordinates")
            .with("up", ["+Z"])
            .build(),
    )?;

    for frame in 0..20i64 {
        rec.set_time_sequence("frame", frame)?;
        rec.set_duration_secs("sim_time", frame as f64 / 30.0)?;

        let t = frame as f32 * 0.1;
        let positions: Vec<[f32; 3]> = (0..8)
            .map(|i| {
                let angle = t + i as f32 * std::f32::consts::FRAC_PI_4;
                [angle.cos(), angle.sin(), t]
            })
            .collect();
        let points = Archetype::builder("Points3D")
            .with("positions", positions)
            .with("radii", vec![0.05f32; 8])
            .build();
        rec.log("world/points", &points)?;

        if frame % 5 == 0 {
            tracing::info!(frame, "checkpoint");
        }
    }

    // Clear the radii so the viewer falls back to its default.
    let radii = ComponentDescriptor::new("radii", ValueTypeTag::Float32).with_archetype("Points3D");
    rec.log("world/points", &ComponentBatch::cleared(radii))?;

    rec.close()?;

    let view = StaticView::from_file(&path)?;
    for (entity, batch) in view.iter() {
        println!("{entity} {} = {}", batch.descriptor(), batch.display_values(4));
    }
    println!("wrote {}", path.display());
    Ok(())
}
