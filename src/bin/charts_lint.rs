fn main() {
    charts_lint::cli::run();
}
