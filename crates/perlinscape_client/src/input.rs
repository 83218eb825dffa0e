use std::collections::HashSet;

use glam::Vec2;
use winit::keyboard::KeyCode;

#[derive(Debug, Default)]
pub struct InputState {
    pressed_keys: HashSet<KeyCode>,
    just_pressed: Vec<KeyCode>,
    pub mouse_delta: Vec2,
    /// Wheel notches since the last frame.
    pub scroll: f32,
}

impl InputState {
    pub fn press_key(&mut self, key: KeyCode) {
        if self.pressed_keys.insert(key) {
            self.just_pressed.push(key);
        }
    }

    pub fn release_key(&mut self, key: KeyCode) {
        self.pressed_keys.remove(&key);
    }

    pub fn is_pressed(&self, key: KeyCode) -> bool {
        self.pressed_keys.contains(&key)
    }

    pub fn add_mouse_delta(&mut self, delta: Vec2) {
        self.mouse_delta += delta;
    }

    pub fn add_scroll(&mut self, lines: f32) {
        self.scroll += lines;
    }

    /// Keys that went down since the last call, in press order. Key repeat is ignored.
    pub fn take_just_pressed(&mut self) -> Vec<KeyCode> {
        std::mem::take(&mut self.just_pressed)
    }

    pub fn release_all(&mut self) {
        self.pressed_keys.clear();
        self.just_pressed.clear();
        self.mouse_delta = Vec2::ZERO;
        self.scroll = 0.0;
    }

    pub fn clear_frame(&mut self) {
        self.mouse_delta = Vec2::ZERO;
        self.scroll = 0.0;
    }
}
