use bollard::models::DeviceRequest;

/// Parsed `docker_gpus` job parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GpuRequest {
    /// Every GPU on the host.
    All,
    /// The given number of GPUs, chosen by the runtime.
    Count(i64),
    /// Specific devices by index or UUID.
    Devices(Vec<String>),
}

impl GpuRequest {
    /// Parses `"all"`, a positive integer, or a comma-separated device list.
    ///
    /// Returns `None` for anything else: zero or negative counts, empty list
    /// segments (`"gpu-0,,"`), or IDs with characters no runtime accepts.
    pub fn parse(raw: &str) -> Option<GpuRequest> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        if raw.eq_ignore_ascii_case("all") {
            return Some(GpuRequest::All);
        }
        if raw.bytes().all(|b| b.is_ascii_digit()) {
            return raw
                .parse::<i64>()
                .ok()
                .filter(|n| *n > 0)
                .map(GpuRequest::Count);
        }
        if raw.starts_with('-') && raw[1..].bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }

        let mut ids = Vec::new();
        for part in raw.split(',') {
            let id = part.trim();
            if id.is_empty() || !id.chars().all(is_device_id_char) {
                return None;
            }
            ids.push(id.to_string());
        }
        Some(GpuRequest::Devices(ids))
    }

    /// Device request for the engine's `HostConfig`.
    pub fn device_request(&self, driver: &str) -> DeviceRequest {
        let (count, device_ids) = match self {
            GpuRequest::All => (-1, None),
            GpuRequest::Count(n) => (*n, None),
            GpuRequest::Devices(ids) => (0, Some(ids.clone())),
        };
        DeviceRequest {
            driver: Some(driver.to_string()),
            count: Some(count),
            device_ids,
            capabilities: Some(vec![vec!["gpu".to_string()]]),
            ..Default::default()
        }
    }
}

fn is_device_id_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | ':' | '.')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_requests_every_device() {
        let req = GpuRequest::parse("all").unwrap();
        assert_eq!(req, GpuRequest::All);
        let dr = req.device_request("nvidia");
        assert_eq!(dr.count, Some(-1));
        assert_eq!(dr.device_ids, None);
        assert_eq!(dr.driver.as_deref(), Some("nvidia"));
        assert_eq!(dr.capabilities, Some(vec![vec!["gpu".to_string()]]));
    }

    #[test]
    fn numeric_is_count() {
        let req = GpuRequest::parse("2").unwrap();
        assert_eq!(req, GpuRequest::Count(2));
        assert_eq!(req.device_request("nvidia").count, Some(2));
    }

    #[test]
    fn id_list_sets_devices_and_zero_count() {
        let req = GpuRequest::parse("gpu-abc,gpu-def").unwrap();
        let dr = req.device_request("nvidia");
        assert_eq!(dr.count, Some(0));
        assert_eq!(
            dr.device_ids,
            Some(vec!["gpu-abc".to_string(), "gpu-def".to_string()])
        );
    }

    #[test]
    fn malformed_values_produce_no_request() {
        assert_eq!(GpuRequest::parse("garbage,,"), None);
        assert_eq!(GpuRequest::parse(""), None);
        assert_eq!(GpuRequest::parse("0"), None);
        assert_eq!(GpuRequest::parse("-1"), None);
        assert_eq!(GpuRequest::parse("gpu 0"), None);
        assert_eq!(GpuRequest::parse(",gpu-0"), None);
    }

    #[test]
    fn index_lists_and_uuids_are_devices() {
        assert_eq!(
            GpuRequest::parse("0, 1"),
            Some(GpuRequest::Devices(vec!["0".into(), "1".into()]))
        );
        assert_eq!(
            GpuRequest::parse("GPU-8f2c1a3e-1b2c-4d5e-9f00-0a1b2c3d4e5f"),
            Some(GpuRequest::Devices(vec![
                "GPU-8f2c1a3e-1b2c-4d5e-9f00-0a1b2c3d4e5f".into()
            ]))
        );
    }

    #[test]
    fn all_is_case_insensitive() {
        assert_eq!(GpuRequest::parse(" ALL "), Some(GpuRequest::All));
    }
}
