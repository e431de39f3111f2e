pub trait TransportInfo {
    /// Gets a short name of the transport.
    fn transport_name() -> &'static str;

    /// Gets an informational string about the transport.
    fn transport_version() -> &'static str {
        ""
    }
}
