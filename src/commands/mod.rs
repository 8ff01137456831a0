pub mod health;
pub mod sensor_stream;
