#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Tanh;

impl Tanh {
    pub fn f(&self, z: f32) -> f32 {
        z.tanh()
    }

    pub fn df(&self, z: f32) -> f32 {
        1. - z.tanh().powi(2)
    }
}
