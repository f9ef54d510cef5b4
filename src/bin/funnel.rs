fn main() -> Result<(), Box<dyn std::error::Error>> {
    funnels::app::run_funnel(std::env::args().skip(1))
}
