use perlinscape_shared::config::{NoiseParams, RenderSettings, MAX_LAYER_COUNT, MIN_LAYER_COUNT};
use winit::event::MouseScrollDelta;
use winit::keyboard::KeyCode;

const SCALE_STEP: f64 = 1.25;
const MIN_SCALE: f64 = 1e-5;
const MAX_SCALE: f64 = 1.0;
const FACTOR_STEP: f64 = 0.05;
const MIN_FACTOR: f64 = 0.05;
const MAX_FACTOR: f64 = 4.0;
const HEIGHT_SCALE_STEP: f32 = 1.1;
const MIN_HEIGHT_SCALE: f32 = 5.0;
const MAX_HEIGHT_SCALE: f32 = 2000.0;
/// Touchpads report pixels; this many count as one wheel notch.
const PIXELS_PER_LINE: f64 = 40.0;

/// Applies a noise-parameter key binding to `params`. Returns whether the key
/// is bound; edited parameters take effect on the next regeneration.
pub fn apply_param_key(params: &mut NoiseParams, key: KeyCode) -> bool {
    match key {
        KeyCode::BracketLeft => {
            params.scale = (params.scale / SCALE_STEP).clamp(MIN_SCALE, MAX_SCALE);
        }
        KeyCode::BracketRight => {
            params.scale = (params.scale * SCALE_STEP).clamp(MIN_SCALE, MAX_SCALE);
        }
        KeyCode::Digit1 => {
            params.layer_count = params.layer_count.saturating_sub(1).max(MIN_LAYER_COUNT);
        }
        KeyCode::Digit2 => {
            params.layer_count = (params.layer_count + 1).min(MAX_LAYER_COUNT);
        }
        KeyCode::Digit3 => params.layer_lacunarity = step_factor(params.layer_lacunarity, -1.0),
        KeyCode::Digit4 => params.layer_lacunarity = step_factor(params.layer_lacunarity, 1.0),
        KeyCode::Digit5 => params.layer_amplitude = step_factor(params.layer_amplitude, -1.0),
        KeyCode::Digit6 => params.layer_amplitude = step_factor(params.layer_amplitude, 1.0),
        KeyCode::KeyN => params.seed = params.seed.wrapping_add(1),
        KeyCode::Digit0 => *params = NoiseParams::default(),
        _ => return false,
    }
    true
}

/// Applies a display binding. Unlike noise keys these take effect immediately.
pub fn apply_render_key(render: &mut RenderSettings, key: KeyCode) -> bool {
    match key {
        KeyCode::Minus => {
            render.height_scale =
                (render.height_scale / HEIGHT_SCALE_STEP).clamp(MIN_HEIGHT_SCALE, MAX_HEIGHT_SCALE);
        }
        KeyCode::Equal => {
            render.height_scale =
                (render.height_scale * HEIGHT_SCALE_STEP).clamp(MIN_HEIGHT_SCALE, MAX_HEIGHT_SCALE);
        }
        _ => return false,
    }
    true
}

/// Wheel notches in a scroll event; positive scrolls away from the user.
pub fn scroll_lines(delta: MouseScrollDelta) -> f32 {
    match delta {
        MouseScrollDelta::LineDelta(_, lines) => lines,
        MouseScrollDelta::PixelDelta(position) => (position.y / PIXELS_PER_LINE) as f32,
    }
}

fn step_factor(value: f64, direction: f64) -> f64 {
    let stepped = ((value + direction * FACTOR_STEP) / FACTOR_STEP).round() * FACTOR_STEP;
    stepped.clamp(MIN_FACTOR, MAX_FACTOR)
}

pub fn describe(params: &NoiseParams) -> String {
    format!(
        "seed {} | scale {:.5} | layers {} | lacunarity {:.2} | amplitude {:.2}",
        params.seed, params.scale, params.layer_count, params.layer_lacunarity, params.layer_amplitude
    )
}

#[cfg(test)]
mod tests {
    use perlinscape_shared::config::{NoiseParams, RenderSettings, MAX_LAYER_COUNT};
    use winit::dpi::PhysicalPosition;
    use winit::event::MouseScrollDelta;
    use winit::keyboard::KeyCode;

    use super::{apply_param_key, apply_render_key, describe, scroll_lines};
    use crate::camera::Camera;

    #[test]
    fn layer_count_stays_in_range() {
        let mut params = NoiseParams {
            layer_count: 1,
            ..NoiseParams::default()
        };
        assert!(apply_param_key(&mut params, KeyCode::Digit1));
        assert_eq!(params.layer_count, 1);

        for _ in 0..20 {
            apply_param_key(&mut params, KeyCode::Digit2);
        }
        assert_eq!(params.layer_count, MAX_LAYER_COUNT);
        assert!(params.validate().is_ok());
    }

    #[test]
    fn factors_step_and_never_reach_zero() {
        let mut params = NoiseParams::default();
        apply_param_key(&mut params, KeyCode::Digit4);
        assert!((params.layer_lacunarity - 0.65).abs() < 1e-9);

        for _ in 0..40 {
            apply_param_key(&mut params, KeyCode::Digit5);
        }
        assert!((params.layer_amplitude - 0.05).abs() < 1e-9);
        assert!(params.validate().is_ok());
    }

    #[test]
    fn scale_moves_geometrically_and_reset_restores_defaults() {
        let mut params = NoiseParams::default();
        apply_param_key(&mut params, KeyCode::BracketRight);
        assert!((params.scale - 0.0015 * 1.25).abs() < 1e-12);

        apply_param_key(&mut params, KeyCode::KeyN);
        assert_eq!(params.seed, 123_457);

        apply_param_key(&mut params, KeyCode::Digit0);
        assert_eq!(params, NoiseParams::default());
        assert!(!apply_param_key(&mut params, KeyCode::KeyQ));
    }

    #[test]
    fn description_names_every_parameter() {
        let text = describe(&NoiseParams::default());
        assert!(text.contains("seed 123456"));
        assert!(text.contains("layers 5"));
        assert!(text.contains("lacunarity 0.60"));
    }

    #[test]
    fn height_scale_keys_step_within_limits() {
        let mut render = RenderSettings::default();
        assert!(apply_render_key(&mut render, KeyCode::Equal));
        assert!((render.height_scale - 132.0).abs() < 1e-3);
        assert!(apply_render_key(&mut render, KeyCode::Minus));
        assert!((render.height_scale - 120.0).abs() < 1e-3);

        for _ in 0..100 {
            apply_render_key(&mut render, KeyCode::Minus);
        }
        assert_eq!(render.height_scale, 5.0);
        for _ in 0..200 {
            apply_render_key(&mut render, KeyCode::Equal);
        }
        assert_eq!(render.height_scale, 2000.0);

        assert!(!apply_render_key(&mut render, KeyCode::Digit1));
        let mut params = NoiseParams::default();
        assert!(!apply_param_key(&mut params, KeyCode::Equal));
    }

    #[test]
    fn scroll_wheel_zooms_field_of_view() {
        assert_eq!(scroll_lines(MouseScrollDelta::LineDelta(0.0, 2.0)), 2.0);
        assert_eq!(
            scroll_lines(MouseScrollDelta::PixelDelta(PhysicalPosition::new(0.0, -80.0))),
            -2.0
        );

        let mut camera = Camera::default();
        let wide = camera.fov;
        camera.zoom(scroll_lines(MouseScrollDelta::LineDelta(0.0, 3.0)));
        assert!(camera.fov < wide);

        camera.zoom(1000.0);
        assert!((camera.fov.to_degrees() - 5.0).abs() < 1e-3);
        camera.zoom(-1000.0);
        assert!((camera.fov - wide).abs() < 1e-5);
    }
}
