use colored::Colorize;

fn main() {
    if let Err(e) = facetflow::run() {
        eprintln!("{} {:?}", "Error:".red(), e);
        std::process::exit(1);
    }
}
