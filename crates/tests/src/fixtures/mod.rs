pub mod test_app;
pub mod ws;
