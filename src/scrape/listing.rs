use crate::{
    cache::Client,
    models::Record,
    scrape::Endpoints,
    util::{absolutize, element_text, sel},
};
use lazy_static::lazy_static;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::collections::BTreeMap;
use tracing::{debug, error, trace, warn};

static ATTR_HREF: &str = "href";

lazy_static! {
    static ref SEL_HEADING: Selector = sel("h4");
    static ref SEL_LINK: Selector = sel("a");
    static ref SEL_BURGER_LINK: Selector = sel("h3 a");
    static ref RE_RESTAURANT: Regex = Regex::new(r"^(.+?)\s*\((.+?)\)$").unwrap();
}

/// Strip markup fragments that sometimes leak into the neighborhood part of a heading
pub fn sanitize_neighborhood(s: &str) -> String {
    s.replace("div>", "").replace(['<', '>'], "").trim().into()
}

fn burger_link<'a>(heading: &ElementRef<'a>) -> Option<ElementRef<'a>> {
    let parent = heading.parent().and_then(ElementRef::wrap)?;
    let next = parent.next_siblings().find_map(ElementRef::wrap)?;
    next.select(&SEL_BURGER_LINK).next()
}

/// Extract all restaurants and their burgers from the listings page.
///
/// Each restaurant is an `h4` with a link titled "Name (Neighborhood)". The burger is linked
/// from an `h3` in the element following the heading's parent.
pub fn parse_listing(html: &str, origin: &str) -> Vec<Record> {
    let doc = Html::parse_document(html);
    let mut records = Vec::new();

    for heading in doc.select(&SEL_HEADING) {
        let Some(link) = heading.select(&SEL_LINK).next() else {
            continue;
        };
        let title = element_text(&link);
        let Some(caps) = RE_RESTAURANT.captures(title.trim()) else {
            trace!(title = title.trim(), "Heading does not look like a restaurant");
            continue;
        };
        let restaurant = caps[1].trim();
        let neighborhood = sanitize_neighborhood(&caps[2]);

        let Some(burger) = burger_link(&heading) else {
            debug!(restaurant, "No burger found for restaurant, skipping");
            continue;
        };
        let burger_name = element_text(&burger);
        let burger_name = burger_name.trim();
        if restaurant.is_empty() || burger_name.is_empty() {
            continue;
        }

        let mut r = Record::new(restaurant, burger_name, &neighborhood);
        r.event_url = link.attr(ATTR_HREF).and_then(|h| absolutize(origin, h));
        r.burger_url = burger.attr(ATTR_HREF).and_then(|h| absolutize(origin, h));
        records.push(r);
    }

    records
}

/// Restaurant name to neighborhood, for every heading on the listings page that has a usable
/// neighborhood, burger or not.
pub fn parse_neighborhoods(html: &str) -> BTreeMap<String, String> {
    let doc = Html::parse_document(html);
    let mut m = BTreeMap::new();

    for link in doc
        .select(&SEL_HEADING)
        .filter_map(|h| h.select(&SEL_LINK).next())
    {
        let title = element_text(&link);
        let Some(caps) = RE_RESTAURANT.captures(title.trim()) else {
            continue;
        };
        let neighborhood = sanitize_neighborhood(&caps[2]);
        if neighborhood.is_empty() {
            warn!(raw = &caps[2], "Skipping invalid neighborhood");
            continue;
        }
        m.insert(caps[1].trim().to_string(), neighborhood);
    }

    m
}

/// Fetch and parse the listings page. Failures are logged and give an empty list.
#[tracing::instrument(skip_all)]
pub async fn scrape_listing(client: &Client, endpoints: &Endpoints) -> Vec<Record> {
    trace!(url = %endpoints.listing_url, "Fetching listings page...");
    match client.get_as_string(&endpoints.listing_url).await {
        Ok(html) => {
            let records = parse_listing(&html, &endpoints.origin);
            debug!("Found {} restaurants", records.len());
            records
        }
        Err(e) => {
            error!(err = %e, url = %endpoints.listing_url, "Failed to fetch listings page");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{self, Opts};
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const LISTING: &str = r#"
<html><body>
<div class="list">
  <div class="event-title"><h4><a href="/portland/events/lardo/e1/">Lardo (Southeast)</a></h4></div>
  <div class="event-body"><h3><a href="/portland/events/lardo-double/e101/">Double Burger</a></h3></div>

  <div class="event-title"><h4><a href="andina/e2/">Andina (Pearl div>)</a></h4></div>
  <div class="event-body"><h3><a href="https://everout.com/portland/events/lomo/e102/">Lomo Burger</a></h3></div>

  <div class="event-title"><h4><a href="/portland/events/noburger/e3/">No Burger (North)</a></h4></div>
  <div class="event-body"><h3><a href="/x/e103/">  </a></h3></div>

  <div class="event-title"><h4><a href="/portland/events/plain/e4/">Plain heading</a></h4></div>
  <div class="event-body"><h3><a href="/x/e104/">Something</a></h3></div>

  <div class="event-title"><h4>No link at all</h4></div>
</div>
</body></html>
"#;

    #[test]
    fn parses_fixture() {
        let records = parse_listing(LISTING, "https://everout.com");
        assert_eq!(2, records.len());

        let lardo = &records[0];
        assert_eq!("Lardo", lardo.restaurant_name);
        assert_eq!("Southeast", lardo.neighborhood);
        assert_eq!("Double Burger", lardo.burger_name);
        assert_eq!(
            Some("https://everout.com/portland/events/lardo/e1/"),
            lardo.event_url.as_deref()
        );
        assert_eq!(
            Some("https://everout.com/portland/events/lardo-double/e101/"),
            lardo.burger_url.as_deref()
        );

        let andina = &records[1];
        assert_eq!("Andina", andina.restaurant_name);
        assert_eq!("Pearl", andina.neighborhood);
        assert_eq!(
            Some("https://everout.com/andina/e2/"),
            andina.event_url.as_deref()
        );
        assert_eq!(
            Some("https://everout.com/portland/events/lomo/e102/"),
            andina.burger_url.as_deref()
        );
    }

    #[test]
    fn neighborhoods_only() {
        let m = parse_neighborhoods(LISTING);
        assert_eq!(3, m.len());
        assert_eq!(Some("Southeast"), m.get("Lardo").map(String::as_str));
        assert_eq!(Some("Pearl"), m.get("Andina").map(String::as_str));
        assert_eq!(Some("North"), m.get("No Burger").map(String::as_str));
    }

    #[test]
    fn neighborhood_artifacts() {
        assert_eq!("Pearl", sanitize_neighborhood(" Pearl div>"));
        assert_eq!("St. Johns", sanitize_neighborhood("<St. Johns>"));
        assert_eq!("", sanitize_neighborhood("div>"));
    }

    async fn client() -> Client {
        cache::Client::build(Opts {
            request_timeout: Duration::from_secs(5),
            ..Default::default()
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn scrape_from_server() {
        let server = MockServer::start().await;
        let endpoints = Endpoints::with_origin(&server.uri());
        Mock::given(method("GET"))
            .and(path(
                "/portland/events/the-portland-mercurys-burger-week-2025/e205791/",
            ))
            .respond_with(ResponseTemplate::new(200).set_body_string(LISTING))
            .mount(&server)
            .await;

        let records = scrape_listing(&client().await, &endpoints).await;
        assert_eq!(2, records.len());
        assert_eq!(
            Some(format!("{}/portland/events/lardo/e1/", server.uri())),
            records[0].event_url
        );
    }

    #[tokio::test]
    async fn network_failure_is_empty() {
        let server = MockServer::start().await;
        let endpoints = Endpoints::with_origin(&server.uri());
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        assert!(scrape_listing(&client().await, &endpoints).await.is_empty());
    }
}
