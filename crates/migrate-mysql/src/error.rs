use migrate_core::SinkError;

/// Map a driver error onto the sink taxonomy.
///
/// Transport and pool failures mean the database could not be reached;
/// server errors mean it answered and refused this particular row.
pub fn classify(sink: &str, err: mysql_async::Error) -> SinkError {
    match err {
        mysql_async::Error::Io(e) => SinkError::unavailable(sink, e.to_string()),
        mysql_async::Error::Driver(e) => SinkError::unavailable(sink, e.to_string()),
        other => SinkError::rejected(sink, other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use migrate_core::SinkErrorKind;
    use mysql_async::{DriverError, ServerError};

    #[test]
    fn test_server_error_is_rejection() {
        let err = mysql_async::Error::Server(ServerError {
            code: 1406,
            message: "Data too long for column 'mobile'".to_string(),
            state: "22001".to_string(),
        });
        let sink_err = classify("live", err);
        assert_eq!(sink_err.kind, SinkErrorKind::Rejected);
        assert!(sink_err.message.contains("Data too long"));
    }

    #[test]
    fn test_driver_error_is_unavailable() {
        let err = mysql_async::Error::Driver(DriverError::PoolDisconnected);
        assert!(classify("live", err).is_unavailable());
    }
}
