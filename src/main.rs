fn main() -> Result<(), Box<dyn std::error::Error>> {
    takeoff::cli::main()
}
