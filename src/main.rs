fn main() {
    sensor_stream_lib::run()
}
