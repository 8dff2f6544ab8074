/// Bevy integration: feeds, per-frame ticking and the live surface entity
use bevy::prelude::*;

use crate::config::PipelineConfig;
use crate::reconstruction::MeshData;
use crate::session::{MeshingSession, SessionEvent};
use crate::tracking::TrackingState;

/// Plugin owning one meshing session for the app.
#[derive(Default)]
pub struct SurfaceReconstructionPlugin {
    pub config: PipelineConfig,
}

#[derive(Resource)]
pub struct MeshingSessionResource(pub MeshingSession);

/// Raw sensor batch as parallel arrays. Points are stamped on receipt.
#[derive(Event, Debug, Clone, Default)]
pub struct PointBatch {
    pub positions: Vec<Vec3>,
    pub colors: Vec<LinearRgba>,
}

/// One update from the device tracking feed.
#[derive(Event, Debug, Clone)]
pub struct TrackingFeedUpdate {
    pub state: TrackingState,
    pub confidence: f32,
    pub pose: Transform,
    pub loss_reason: Option<String>,
}

/// Session events forwarded once per frame.
#[derive(Event, Debug, Clone, PartialEq)]
pub struct SurfaceEvent(pub SessionEvent);

/// Entity rendering the live surface. `revision` is the driver revision
/// currently uploaded to its mesh.
#[derive(Component, Default)]
pub struct ReconstructedSurface {
    pub revision: u64,
}

impl Plugin for SurfaceReconstructionPlugin {
    fn build(&self, app: &mut App) {
        app.insert_resource(MeshingSessionResource(MeshingSession::new(
            self.config.clone(),
        )))
        .add_event::<PointBatch>()
        .add_event::<TrackingFeedUpdate>()
        .add_event::<SurfaceEvent>()
        .add_systems(Startup, spawn_surface)
        .add_systems(
            Update,
            (ingest_feeds, tick_session, sync_surface_mesh).chain(),
        );
    }
}

fn spawn_surface(
    mut commands: Commands,
    mut meshes: ResMut<Assets<Mesh>>,
    mut materials: ResMut<Assets<StandardMaterial>>,
) {
    commands.spawn((
        Mesh3d(meshes.add(MeshData::default().into_mesh())),
        MeshMaterial3d(materials.add(StandardMaterial {
            base_color: Color::WHITE,
            cull_mode: None,
            ..default()
        })),
        Visibility::Visible,
        Transform::IDENTITY,
        ReconstructedSurface::default(),
    ));
}

fn ingest_feeds(
    mut session: ResMut<MeshingSessionResource>,
    mut batches: EventReader<PointBatch>,
    mut feed: EventReader<TrackingFeedUpdate>,
    time: Res<Time>,
) {
    let now = time.elapsed_secs_f64();
    for batch in batches.read() {
        session.0.add_points(&batch.positions, &batch.colors, now);
    }
    for update in feed.read() {
        session.0.update_tracking(
            update.state,
            update.confidence,
            update.pose,
            now,
            update.loss_reason.as_deref(),
        );
    }
}

fn tick_session(
    mut session: ResMut<MeshingSessionResource>,
    mut events: EventWriter<SurfaceEvent>,
    time: Res<Time>,
) {
    session.0.tick(time.elapsed_secs_f64());
    for event in session.0.drain_events() {
        events.write(SurfaceEvent(event));
    }
}

/// Upload new surface revisions, hide while frozen and apply restored anchors
fn sync_surface_mesh(
    session: Res<MeshingSessionResource>,
    mut events: EventReader<SurfaceEvent>,
    mut meshes: ResMut<Assets<Mesh>>,
    mut surfaces: Query<(
        &Mesh3d,
        &mut Visibility,
        &mut Transform,
        &mut ReconstructedSurface,
    )>,
) {
    let anchor = events.read().fold(None, |anchor, event| match &event.0 {
        SessionEvent::SurfaceRestored {
            anchor: Some(restored),
        } => Some(*restored),
        _ => anchor,
    });

    let driver = session.0.driver();
    let target_visibility = if driver.is_frozen() {
        Visibility::Hidden
    } else {
        Visibility::Visible
    };

    for (mesh, mut visibility, mut transform, mut surface) in &mut surfaces {
        if surface.revision != driver.revision() {
            if let Some(existing) = meshes.get_mut(&mesh.0) {
                *existing = MeshData::from_triangles(driver.surface()).into_mesh();
            }
            surface.revision = driver.revision();
        }
        if *visibility != target_visibility {
            *visibility = target_visibility;
        }
        if let Some(anchor) = anchor {
            *transform = anchor;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconstruction::AlgorithmKind;

    fn test_app() -> App {
        let mut config = PipelineConfig::default();
        config.reconstruction.algorithm = AlgorithmKind::PointCloud;

        let mut app = App::new();
        app.add_plugins(MinimalPlugins)
            .init_resource::<Assets<Mesh>>()
            .init_resource::<Assets<StandardMaterial>>()
            .add_plugins(SurfaceReconstructionPlugin { config });
        app
    }

    #[test]
    fn point_batches_reach_the_surface_mesh() {
        let mut app = test_app();
        app.world_mut().send_event(PointBatch {
            positions: vec![Vec3::ZERO, Vec3::X * 20.0],
            colors: vec![LinearRgba::RED, LinearRgba::GREEN],
        });
        app.update();

        let session = &app.world().resource::<MeshingSessionResource>().0;
        assert_eq!(session.point_count(), 2);
        let revision = session.driver().revision();
        assert_eq!(revision, 1);

        let mut surfaces = app.world_mut().query::<&ReconstructedSurface>();
        let surface = surfaces.single(app.world()).expect("one surface entity");
        assert_eq!(surface.revision, revision);
    }

    #[test]
    fn tracking_loss_hides_surface() {
        let mut app = test_app();
        for (state, confidence) in [(TrackingState::Full, 0.95), (TrackingState::Lost, 0.1)] {
            app.world_mut().send_event(TrackingFeedUpdate {
                state,
                confidence,
                pose: Transform::IDENTITY,
                loss_reason: None,
            });
            app.update();
        }

        let mut surfaces = app
            .world_mut()
            .query_filtered::<&Visibility, With<ReconstructedSurface>>();
        let visibility = surfaces.single(app.world()).expect("one surface entity");
        assert_eq!(*visibility, Visibility::Hidden);
    }
}
