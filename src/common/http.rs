use anyhow::{Context, Result, anyhow};
use geo::{Coord, Rect};
use reqwest::blocking::Client;
use serde_json::Value;

use crate::config::Network;

/// Blocking client with the configured user agent and timeout.
pub(crate) fn http_client(network: &Network) -> Result<Client> {
    Client::builder()
        .user_agent(network.user_agent.clone())
        .timeout(network.timeout())
        .build()
        .context("[http] Failed to build HTTP client")
}

/// A geocoder result: the matched point and its extent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct GeocodeHit {
    pub(crate) point: Coord<f64>,
    pub(crate) extent: Rect<f64>,
}

/// First Nominatim match for `query`, optionally restricted to `viewbox`.
pub(crate) fn geocode(client: &Client, query: &str, viewbox: Option<&Rect<f64>>, network: &Network) -> Result<Option<GeocodeHit>> {
    let mut params = vec![
        ("q", query.to_string()),
        ("format", "json".to_string()),
        ("limit", "1".to_string()),
    ];
    if let Some(rect) = viewbox {
        // left, top, right, bottom
        params.push(("viewbox", format!("{},{},{},{}", rect.min().x, rect.max().y, rect.max().x, rect.min().y)));
        params.push(("bounded", "1".to_string()));
    }

    let body = client.get(&network.nominatim_url)
        .query(&params)
        .send()
        .with_context(|| format!("GET {}", network.nominatim_url))?
        .error_for_status()
        .with_context(|| format!("GET {} returned error status", network.nominatim_url))?
        .text()?;
    let value: Value = serde_json::from_str(&body).context("[http] Geocoder returned invalid JSON")?;
    value.get(0).map(parse_hit).transpose()
}

fn parse_hit(hit: &Value) -> Result<GeocodeHit> {
    let number = |value: &Value| -> Option<f64> { value.as_str().and_then(|s| s.parse().ok()) };
    let malformed = || anyhow!("[http] Malformed geocoder result: {hit}");
    let point = Coord {
        x: number(&hit["lon"]).ok_or_else(malformed)?,
        y: number(&hit["lat"]).ok_or_else(malformed)?,
    };
    // Nominatim order: south, north, west, east
    let bbox = hit["boundingbox"].as_array().ok_or_else(malformed)?;
    let edge = |i: usize| bbox.get(i).and_then(number).ok_or_else(malformed);
    let extent = Rect::new(Coord { x: edge(2)?, y: edge(0)? }, Coord { x: edge(3)?, y: edge(1)? });
    Ok(GeocodeHit { point, extent })
}
