//! Camera helpers: how much of the map a viewer sees and where things land on screen.
//!
//! The server uses [`cull_for_viewer`] to trim each outgoing snapshot to what
//! its recipient can see; renderers use the same functions to draw it.

use crate::agent::{BoundingBox, Position};
use crate::snapshot::WorldSnapshot;
use crate::{RADIUS_MIN, SCREEN_HEIGHT, SCREEN_WIDTH, ZOOM_DIVISOR};

/// Map units per screen pixel for an agent of the given radius. Grows as the agent does.
pub fn zoom_factor(radius: f64) -> f64 {
    (radius / RADIUS_MIN).sqrt() / ZOOM_DIVISOR
}

/// Map coordinate the screen centre sits on.
///
/// Follows the head but stops at the map edges so the camera never shows
/// more than one screen's worth past a border.
pub fn camera_center(head: Position, zoom: f64, map_width: i32, map_height: i32) -> (f64, f64) {
    let half_w = SCREEN_WIDTH * zoom / 2.0;
    let half_h = SCREEN_HEIGHT * zoom / 2.0;
    let x = half_w.max((map_width as f64 - half_w).min(head.x as f64));
    let y = half_h.max((map_height as f64 - half_h).min(head.y as f64));
    (x, y)
}

/// Screen pixel of a map position.
pub fn project(position: Position, camera: (f64, f64), zoom: f64) -> (i32, i32) {
    (
        (SCREEN_WIDTH / 2.0 - (camera.0 - position.x as f64) / zoom).round() as i32,
        (SCREEN_HEIGHT / 2.0 - (camera.1 - position.y as f64) / zoom).round() as i32,
    )
}

/// Screen length of a map distance.
pub fn screen_distance(distance: f64, zoom: f64) -> f64 {
    distance / zoom
}

/// Part of the map visible to an agent with this head and radius.
pub fn visible_region(head: Position, radius: f64, map_width: i32, map_height: i32) -> BoundingBox {
    let zoom = zoom_factor(radius);
    let (cx, cy) = camera_center(head, zoom, map_width, map_height);
    let half_w = SCREEN_WIDTH * zoom / 2.0;
    let half_h = SCREEN_HEIGHT * zoom / 2.0;
    BoundingBox {
        min_x: cx - half_w,
        min_y: cy - half_h,
        max_x: cx + half_w,
        max_y: cy + half_h,
    }
}

/// Copy of `snapshot` holding only what `viewer_id` can see.
///
/// Agents are kept when their bounding box, grown by their radius, overlaps the
/// viewer's visible region; the viewer itself is always kept. Returns `None`
/// when the viewer is not in the snapshot.
pub fn cull_for_viewer(snapshot: &WorldSnapshot, viewer_id: &str) -> Option<WorldSnapshot> {
    let viewer = snapshot.agent(viewer_id)?;
    let head = viewer.head()?;
    let region = visible_region(head, viewer.radius, snapshot.map_width, snapshot.map_height);

    let agents = snapshot
        .agents
        .iter()
        .filter(|a| a.id == viewer_id || a.bounding_box.expanded(a.radius).intersects(&region))
        .cloned()
        .collect();
    let resources = snapshot
        .resources
        .iter()
        .filter(|r| region.expanded(r.radius).contains(r.position))
        .copied()
        .collect();

    Some(WorldSnapshot {
        tick: snapshot.tick,
        map_width: snapshot.map_width,
        map_height: snapshot.map_height,
        agents,
        resources,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{Agent, Color};
    use crate::snapshot::{AgentView, ResourceView};
    use assert_approx_eq::assert_approx_eq;

    fn view(id: &str, x: i32, y: i32) -> AgentView {
        AgentView::from_agent(id, &Agent::new(Position::new(x, y), Color::new(255, 255, 255)))
    }

    fn food_at(x: i32, y: i32) -> ResourceView {
        ResourceView {
            position: Position::new(x, y),
            color: Color::new(0, 255, 0),
            radius: 5.0,
            value: 1.0,
        }
    }

    #[test]
    fn test_zoom_factor_of_fresh_agent() {
        assert_approx_eq!(zoom_factor(RADIUS_MIN), 1.0 / ZOOM_DIVISOR);
        assert!(zoom_factor(RADIUS_MIN * 4.0) > zoom_factor(RADIUS_MIN));
    }

    #[test]
    fn test_camera_follows_head_away_from_edges() {
        let (x, y) = camera_center(Position::new(1500, 1400), 1.0, 3000, 3000);
        assert_approx_eq!(x, 1500.0);
        assert_approx_eq!(y, 1400.0);
    }

    #[test]
    fn test_camera_clamps_at_edges() {
        let (x, y) = camera_center(Position::new(10, 2990), 1.0, 3000, 3000);
        assert_approx_eq!(x, SCREEN_WIDTH / 2.0);
        assert_approx_eq!(y, 3000.0 - SCREEN_HEIGHT / 2.0);
    }

    #[test]
    fn test_project_head_to_screen_center() {
        let head = Position::new(1500, 1500);
        let zoom = zoom_factor(RADIUS_MIN);
        let camera = camera_center(head, zoom, 3000, 3000);
        assert_eq!(
            project(head, camera, zoom),
            ((SCREEN_WIDTH / 2.0) as i32, (SCREEN_HEIGHT / 2.0) as i32)
        );
        assert_approx_eq!(screen_distance(13.0, zoom), 13.0 * ZOOM_DIVISOR);
    }

    #[test]
    fn test_visible_region_size() {
        let region = visible_region(Position::new(1500, 1500), RADIUS_MIN, 3000, 3000);
        let zoom = zoom_factor(RADIUS_MIN);
        assert_approx_eq!(region.max_x - region.min_x, SCREEN_WIDTH * zoom);
        assert_approx_eq!(region.max_y - region.min_y, SCREEN_HEIGHT * zoom);
        assert!(region.contains(Position::new(1500, 1500)));
    }

    #[test]
    fn test_cull_drops_far_agents_and_resources() {
        let snapshot = WorldSnapshot {
            tick: 9,
            map_width: 3000,
            map_height: 3000,
            agents: vec![view("far", 100, 100), view("me", 1500, 1500), view("near", 1600, 1500)],
            resources: vec![food_at(1510, 1500), food_at(2900, 2900)],
        };

        let culled = cull_for_viewer(&snapshot, "me").unwrap();

        let ids: Vec<&str> = culled.agents.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["me", "near"]);
        assert_eq!(culled.resources, vec![food_at(1510, 1500)]);
        assert_eq!(culled.tick, 9);
    }

    #[test]
    fn test_cull_unknown_viewer() {
        let snapshot = WorldSnapshot {
            tick: 0,
            map_width: 3000,
            map_height: 3000,
            agents: vec![view("me", 1500, 1500)],
            resources: vec![],
        };
        assert!(cull_for_viewer(&snapshot, "ghost").is_none());
    }
}
