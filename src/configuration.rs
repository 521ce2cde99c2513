pub trait Configuration: Clone + Send + Sync + 'static {
    fn port(&self) -> String;
    /// Base URL of the appointment service. Without one, an in-process schedule is used.
    fn backend_url(&self) -> Option<String>;
    fn example_days(&self) -> i64;
}
