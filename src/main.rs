fn main() {
    taskbridge_lib::run()
}
