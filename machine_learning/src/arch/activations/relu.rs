#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Relu;

impl Relu {
    pub fn f(&self, z: f32) -> f32 {
        z.max(0.)
    }

    pub fn df(&self, z: f32) -> f32 {
        if z > 0. { 1. } else { 0. }
    }
}
