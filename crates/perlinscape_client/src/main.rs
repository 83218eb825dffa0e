mod app;
mod camera;
mod controls;
mod input;
mod renderer;

fn main() {
    app::run();
}
