use std::error::Error;

fn main() -> Result<(), Box<dyn Error>> {
    threadline::cli::main()
}
