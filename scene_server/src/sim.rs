//! Demo simulation tick.
//!
//! Spins non-static models and animates the dynamic fields of point lights,
//! publishing the results as transform and light updates for the UDP
//! sender. It also consumes the freshest client camera.

use std::{sync::Arc, thread, time::Duration};

use rand::{rngs::StdRng, Rng, SeedableRng};
use scene_shared::{
    endpoint::{Endpoint, Liveness},
    math::Vec3,
    resources::LightDynMask,
    udp::{PointLightUpdate, TransformUpdate},
};
use tracing::trace;

use crate::{
    scene::{NodeFlags, NodeType},
    shared::{lock, ServerShared},
};

/// Radians per second.
const SPIN_SPEED: f32 = 0.8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimOptions {
    pub move_objects: bool,
    pub change_lights: bool,
}

impl Default for SimOptions {
    fn default() -> Self {
        Self {
            move_objects: true,
            change_lights: true,
        }
    }
}

pub struct Simulation {
    shared: Arc<ServerShared>,
    opts: SimOptions,
    rng: StdRng,
    elapsed: f32,
}

impl Simulation {
    pub fn new(shared: Arc<ServerShared>, opts: SimOptions) -> Self {
        Self {
            shared,
            opts,
            rng: StdRng::from_entropy(),
            elapsed: 0.0,
        }
    }

    /// Advances by `dt` seconds; returns the number of updates published.
    pub fn tick(&mut self, dt: f32) -> usize {
        if !self.shared.is_client_connected() {
            return 0;
        }
        self.elapsed += dt;
        if let Some(camera) = self.shared.camera.take() {
            trace!(x = camera.position.x, y = camera.position.y, z = camera.position.z, "client camera");
        }

        let mut published = 0;
        let mut lights = Vec::new();
        {
            let mut scene = lock(&self.shared.scene);
            for node in scene.nodes_mut() {
                match node.kind {
                    NodeType::Model => {
                        if !self.opts.move_objects || node.flags.contains(NodeFlags::STATIC) {
                            continue;
                        }
                        node.transform = node.transform.rotated_y(dt * SPIN_SPEED);
                        self.shared.to_client.push_transform(TransformUpdate {
                            object_id: node.name,
                            transform: node.transform,
                        });
                        published += 1;
                    }
                    NodeType::PointLight => lights.push(node.name),
                }
            }
        }

        if self.opts.change_lights && !lights.is_empty() {
            let mut store = self.shared.write_store();
            for id in lights {
                let Some(light) = store.point_lights.get_mut(id) else {
                    continue;
                };
                let phase = self.elapsed + (id.0 % 628) as f32 / 100.0;
                if light.dyn_mask.contains(LightDynMask::POSITION) {
                    let (x, z) = (light.position.x, light.position.z);
                    let r = (x * x + z * z).sqrt().max(1.0);
                    light.position = Vec3::new(r * phase.cos(), light.position.y, r * phase.sin());
                }
                if light.dyn_mask.contains(LightDynMask::COLOR) {
                    let jitter: f32 = self.rng.gen_range(-0.05..0.05);
                    light.color = Vec3::new(
                        0.5 + 0.5 * phase.sin(),
                        0.5 + 0.5 * (phase + 2.1).sin(),
                        (0.5 + 0.5 * (phase + 4.2).sin() + jitter).clamp(0.0, 1.0),
                    );
                }
                if light.dyn_mask.contains(LightDynMask::INTENSITY) {
                    light.attenuation = 0.5 + 0.25 * (phase * 1.7).sin();
                }
                if let Some(update) = PointLightUpdate::from_light(light) {
                    self.shared.to_client.push_light(update);
                    published += 1;
                }
            }
        }
        published
    }

    /// Runs `tick` every `period` on its own thread.
    pub fn spawn(mut self, period: Duration) -> anyhow::Result<Endpoint> {
        Endpoint::spawn("simulation", move |live: Liveness| {
            while live.is_alive() {
                self.tick(period.as_secs_f32());
                thread::sleep(period);
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    use scene_shared::{config::SyncConfig, id::ResourceId, math::Mat4, resources::Camera};

    use crate::{
        demo::{demo_catalog, demo_store, DemoLoader},
        shared::Connection,
    };

    fn connected_shared() -> Arc<ServerShared> {
        let shared = Arc::new(ServerShared::new(
            SyncConfig::default(),
            demo_store(2).unwrap(),
            Arc::new(DemoLoader),
            demo_catalog(),
            HashSet::new(),
        ));
        let conn = Connection::new("127.0.0.1:9".parse().unwrap(), shared.wake.clone());
        shared.set_connection(Some(Arc::new(conn)));
        shared
    }

    #[test]
    fn idle_without_client() {
        let shared = connected_shared();
        shared.set_connection(None);
        let mut sim = Simulation::new(shared, SimOptions::default());
        assert_eq!(sim.tick(0.016), 0);
    }

    #[test]
    fn publishes_transforms_and_lights() {
        let shared = connected_shared();
        {
            let mut scene = lock(&shared.scene);
            scene.add_node(ResourceId::from_name("cube"), NodeType::Model, Mat4::IDENTITY);
            scene
                .add_node(ResourceId::from_name("floor"), NodeType::Model, Mat4::IDENTITY)
                .flags |= NodeFlags::STATIC;
            scene.add_node(ResourceId::from_name("Light 0"), NodeType::PointLight, Mat4::IDENTITY);
        }
        shared.camera.put(Camera::default());

        let mut sim = Simulation::new(shared.clone(), SimOptions::default());
        assert_eq!(sim.tick(0.1), 2);
        assert!(shared.camera.peek().is_none());

        let transforms = shared.to_client.take_transforms();
        assert_eq!(transforms.len(), 1);
        assert_eq!(transforms[0].object_id, ResourceId::from_name("cube"));
        assert_eq!(shared.to_client.take_lights().len(), 1);
    }

    #[test]
    fn options_disable_each_animation() {
        let shared = connected_shared();
        {
            let mut scene = lock(&shared.scene);
            scene.add_node(ResourceId::from_name("cube"), NodeType::Model, Mat4::IDENTITY);
            scene.add_node(ResourceId::from_name("Light 1"), NodeType::PointLight, Mat4::IDENTITY);
        }
        let opts = SimOptions {
            move_objects: false,
            change_lights: false,
        };
        let mut sim = Simulation::new(shared.clone(), opts);
        assert_eq!(sim.tick(0.1), 0);
        assert!(shared.to_client.take_transforms().is_empty());
    }
}
