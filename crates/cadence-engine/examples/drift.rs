//! Headless drift demo -- a title state hands over to a field of drifting
//! motes built from a JSON template, then the engine exits.
//!
//! Run with:
//!   cargo run --example drift -p cadence-engine
//!
//! Set `RUST_LOG=cadence_engine=debug,cadence_ecs=debug` to watch the state
//! transitions and entity lifecycle.

use std::any::Any;
use std::cell::Cell;
use std::rc::Rc;

use cadence_engine::prelude::*;

// ---------------------------------------------------------------------------
// Components and systems
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Clone, PartialEq)]
struct Position {
    x: f32,
    y: f32,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
struct DriftData {
    dx: f32,
    dy: f32,
}

#[derive(Debug, Clone, PartialEq)]
struct Drift {
    dx: f32,
    dy: f32,
}

const POSITION: ComponentId = ComponentId(0);
const DRIFT: ComponentId = ComponentId(1);

const MOVE: SystemId = SystemId(0);
const WRAP: SystemId = SystemId(1);

const MOTE_TEMPLATE: &str = r#"{
    "components": [
        { "id": "position" },
        { "id": "drift", "data": { "dx": 0.5, "dy": -0.25 } }
    ]
}"#;

const FIELD_SIZE: f32 = 32.0;
const TITLE_FRAMES: u64 = 3;
const FIELD_FRAMES: u64 = 60;

fn build_world() -> anyhow::Result<World> {
    let mut world = World::with_capacity(2, 2);
    world.component_new(POSITION, ComponentKind::new::<Position>("position"));
    world.component_new(
        DRIFT,
        ComponentKind::with_serde_data::<Drift, DriftData>("drift", |data, ctx| {
            let scale = ctx.and_then(|c| c.downcast_ref::<f32>()).copied().unwrap_or(1.0);
            let (dx, dy) = data.map_or((0.0, 0.0), |d| (d.dx, d.dy));
            Drift {
                dx: dx * scale,
                dy: dy * scale,
            }
        }),
    );

    world.system_new(
        MOVE,
        |world, e| {
            let drift = world.entity_component_req::<Drift>(e, DRIFT).clone();
            let p = world.entity_component_req_mut::<Position>(e, POSITION);
            p.x += drift.dx;
            p.y += drift.dy;
        },
        false,
    );
    world.system_add(MOVE, POSITION);
    world.system_add(MOVE, DRIFT);

    world.system_new(
        WRAP,
        |world, e| {
            let p = world.entity_component_req_mut::<Position>(e, POSITION);
            p.x = p.x.rem_euclid(FIELD_SIZE);
            p.y = p.y.rem_euclid(FIELD_SIZE);
        },
        false,
    );
    world.system_add(WRAP, POSITION);

    world.template_load_str("mote", MOTE_TEMPLATE)?;
    Ok(world)
}

// ---------------------------------------------------------------------------
// States
// ---------------------------------------------------------------------------

fn title(engine: &mut Engine, stage: Stage, pass: Pass) {
    match (stage, pass) {
        (Stage::Init, _) => tracing::info!("title: hello"),
        (Stage::Loop, Pass::Frame) if engine.frames() + 1 >= TITLE_FRAMES => {
            engine.state_replace("field");
        }
        (Stage::Free, _) => tracing::info!("title: bye"),
        _ => {}
    }
}

fn field(started_at: Rc<Cell<u64>>) -> impl FnMut(&mut Engine, Stage, Pass) {
    move |engine, stage, pass| match (stage, pass) {
        (Stage::Init, _) => {
            started_at.set(engine.frames());
            let world = engine.world_mut();
            for i in 0..8u8 {
                let scale = f32::from(i + 1);
                let e = world.entity_new_from_template("mote", Some(&scale as &dyn Any), None);
                if let Some(p) = world.entity_component_mut::<Position>(e, POSITION) {
                    p.x = f32::from(i) * 4.0;
                }
            }
            tracing::info!(motes = 8, "field: spawned");
        }
        (Stage::Loop, Pass::Step) => {
            let world = engine.world_mut();
            world.system_run(MOVE);
            world.system_run(WRAP);
        }
        (Stage::Loop, Pass::Frame) => {
            if engine.frames() - started_at.get() >= FIELD_FRAMES {
                engine.state_exit();
            }
        }
        (Stage::Free, _) => {
            let world = engine.world();
            for e in world.system_entities(MOVE) {
                if let Some(p) = world.entity_component::<Position>(e, POSITION) {
                    tracing::info!(entity = %e, x = p.x, y = p.y, "field: final position");
                }
            }
        }
        _ => {}
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<(), anyhow::Error> {
    let config = EngineConfig::from_json_str(r#"{ "tick_rate": 60, "log_filter": "info" }"#)?;
    init_logging(LoggingConfig::from(&config));

    let world = build_world()?;
    let mut engine = Engine::new(world, config)?.with_governor(LockstepClock::new(2));

    engine.state_new("title", title);
    engine.state_new("field", field(Rc::new(Cell::new(0))));

    engine.state_push("title");
    engine.run();

    tracing::info!(
        frames = engine.frames(),
        ticks = engine.ticks(),
        "drift finished"
    );
    Ok(())
}
