//! Integration tests for the crawler
//!
//! These tests use wiremock to create mock HTTP servers and test
//! the full crawl cycle end-to-end.

use futures::FutureExt;
use serde_json::{json, Value};
use treecrawl::config::parse_rule_file;
use treecrawl::{
    crawl, CrawlError, CrawlOptions, DownloadSpec, Group, Lookup, Mode, Node, PageData, PageRule,
    Rule, RuleTree, WaitFor,
};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Options with short timers for testing
fn test_options() -> CrawlOptions {
    CrawlOptions {
        retry: 0,
        retry_timeout: 10,
        poll_interval: 10,
        ..Default::default()
    }
}

fn html(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body, "text/html")
}

async fn mount(server: &MockServer, route: &str, response: ResponseTemplate) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(response)
        .mount(server)
        .await;
}

fn page<'a>(node: &'a Node) -> &'a PageData {
    node.as_page().expect("Expected a page node")
}

#[tokio::test]
async fn test_title_and_download() {
    let mock_server = MockServer::start().await;
    mount(
        &mock_server,
        "/",
        html(r#"<html><head><title> Home </title></head><body><img src="/pic.png"></body></html>"#),
    )
    .await;
    mount(
        &mock_server,
        "/pic.png",
        ResponseTemplate::new(200).set_body_raw(vec![137u8, 80, 78, 71], "image/png"),
    )
    .await;

    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let dir_path = dir.path().to_str().expect("Temp dir is not UTF-8").to_string();

    let tree = RuleTree::builder()
        .build(
            PageRule::new().field("title", "title").field(
                "pic",
                Rule::selector("img")
                    .attr("src")
                    .download(DownloadSpec::new().path(&dir_path).filename("cover")),
            ),
        )
        .unwrap();

    let result = crawl(&format!("{}/", mock_server.uri()), tree, test_options())
        .await
        .expect("Crawl failed");

    assert_eq!(result["title"].as_str(), Some("Home"));

    let saved = dir.path().join("cover.png");
    assert_eq!(result["pic"].saved_path(), Some(saved.to_str().unwrap()));
    assert_eq!(
        result["pic"].url(),
        Some(format!("{}/pic.png", mock_server.uri()).as_str())
    );
    assert_eq!(std::fs::read(&saved).unwrap(), vec![137u8, 80, 78, 71]);

    assert_eq!(
        result.to_json(),
        json!({ "title": "Home", "pic": { "SAVED_PATH": saved.to_str().unwrap() } })
    );
}

#[tokio::test]
async fn test_nested_pages_and_references() {
    let mock_server = MockServer::start().await;
    mount(
        &mock_server,
        "/",
        html(r#"<title>Shop</title><a class="next" href="/detail">more</a>"#),
    )
    .await;
    mount(
        &mock_server,
        "/detail",
        html(r#"<h1>Widget</h1><p class="Shop">in shop</p><p class="Other">elsewhere</p>"#),
    )
    .await;

    let mut builder = RuleTree::builder();
    let detail = builder.page(
        PageRule::new()
            .field("heading", "h1")
            // Built from the parent page's title
            .field(
                "blurb",
                WaitFor::one("../title", |title: Value| {
                    Rule::selector(format!("p.{}", title.as_str().unwrap_or("none")))
                }),
            )
            .field(
                "label",
                Rule::selector("h1").convert_async(|value: Value, _, lookup: Lookup| {
                    async move {
                        let title = lookup.get("../title").await?;
                        Ok::<_, CrawlError>(json!(format!(
                            "{}: {}",
                            title.as_str().unwrap_or(""),
                            value.as_str().unwrap_or("")
                        )))
                    }
                    .boxed_local()
                }),
            ),
    );
    let tree = builder
        .build(
            PageRule::new()
                .field("title", "title")
                .field("next", Rule::selector("a.next").attr("href").rules(detail))
                // Waits on a field of the nested page
                .field(
                    "summary",
                    WaitFor::one("./next/heading", |heading: Value| {
                        Rule::selector("title").convert(move |_, _| heading.clone())
                    }),
                ),
        )
        .unwrap();

    let result = crawl(&mock_server.uri(), tree, test_options())
        .await
        .expect("Crawl failed");

    let next = page(&result["next"]);
    assert_eq!(next.url(), format!("{}/detail", mock_server.uri()));
    assert_eq!(next["heading"].as_str(), Some("Widget"));
    assert_eq!(next["blurb"].as_str(), Some("in shop"));
    assert_eq!(next["label"].as_str(), Some("Shop: Widget"));
    assert_eq!(result["summary"].as_str(), Some("Widget"));
}

#[tokio::test]
async fn test_failed_page_is_isolated() {
    let mock_server = MockServer::start().await;
    mount(
        &mock_server,
        "/",
        html(r#"<title>Home</title><a class="gone" href="/gone">x</a><a class="ok" href="/ok">y</a>"#),
    )
    .await;
    mount(&mock_server, "/gone", ResponseTemplate::new(404)).await;
    mount(&mock_server, "/ok", html("<h1>Fine</h1>")).await;

    let mut builder = RuleTree::builder();
    let detail = builder.page(PageRule::new().field("heading", "h1"));
    let tree = builder
        .build(
            PageRule::new()
                .field("title", "title")
                .field("gone", Rule::selector("a.gone").attr("href").rules(detail))
                .field("ok", Rule::selector("a.ok").attr("href").rules(detail))
                .field(
                    "gone_heading",
                    WaitFor::one("./gone/heading", |_| Rule::selector("title")),
                ),
        )
        .unwrap();

    let result = crawl(&mock_server.uri(), tree, test_options())
        .await
        .expect("Crawl failed");

    let gone_url = format!("{}/gone", mock_server.uri());
    assert_eq!(result["title"].as_str(), Some("Home"));
    assert_eq!(
        result["gone"].error(),
        Some(format!("request url({}) failed: Not Found", gone_url).as_str())
    );
    assert_eq!(result["gone"].url(), Some(gone_url.as_str()));
    assert_eq!(page(&result["ok"])["heading"].as_str(), Some("Fine"));

    // The reference into the failed page sees the page's error
    assert_eq!(result["gone_heading"].error(), result["gone"].error());
}

#[tokio::test]
async fn test_retry_recovers() {
    let mock_server = MockServer::start().await;
    mount(&mock_server, "/", html(r#"<a href="/flaky">f</a>"#)).await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&mock_server)
        .await;
    mount(&mock_server, "/flaky", html("<h1>Recovered</h1>")).await;

    let mut builder = RuleTree::builder();
    let detail = builder.page(PageRule::new().field("heading", "h1"));
    let tree = builder
        .build(PageRule::new().field("next", Rule::selector("a").attr("href").rules(detail)))
        .unwrap();

    let options = CrawlOptions {
        retry: 2,
        ..test_options()
    };
    let result = crawl(&mock_server.uri(), tree, options)
        .await
        .expect("Crawl failed");

    assert_eq!(page(&result["next"])["heading"].as_str(), Some("Recovered"));
}

#[tokio::test]
async fn test_retries_exhausted() {
    let mock_server = MockServer::start().await;
    mount(&mock_server, "/", html(r#"<a href="/down">d</a>"#)).await;
    Mock::given(method("GET"))
        .and(path("/down"))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&mock_server)
        .await;

    let mut builder = RuleTree::builder();
    let detail = builder.page(PageRule::new().field("heading", "h1"));
    let tree = builder
        .build(PageRule::new().field("next", Rule::selector("a").attr("href").rules(detail)))
        .unwrap();

    let options = CrawlOptions {
        retry: 2,
        ..test_options()
    };
    let result = crawl(&mock_server.uri(), tree, options)
        .await
        .expect("Crawl failed");

    assert_eq!(
        result["next"].error(),
        Some(format!("request url({}/down) failed: Internal Server Error", mock_server.uri()).as_str())
    );
}

#[tokio::test]
async fn test_non_html_nested_page() {
    let mock_server = MockServer::start().await;
    mount(&mock_server, "/", html(r#"<a href="/data.json">j</a>"#)).await;
    mount(
        &mock_server,
        "/data.json",
        ResponseTemplate::new(200).set_body_raw(r#"{"a":1}"#, "application/json"),
    )
    .await;

    let mut builder = RuleTree::builder();
    let detail = builder.page(PageRule::new().field("heading", "h1"));
    let tree = builder
        .build(PageRule::new().field("next", Rule::selector("a").attr("href").rules(detail)))
        .unwrap();

    let result = crawl(&mock_server.uri(), tree, test_options())
        .await
        .expect("Crawl failed");

    let message = result["next"].error().expect("Expected an error");
    assert!(message.starts_with(&format!("request url({}/data.json) failed:", mock_server.uri())));
    assert!(message.contains("application/json"));
}

#[tokio::test]
async fn test_invalid_urls() {
    let mock_server = MockServer::start().await;
    mount(
        &mock_server,
        "/",
        html(r#"<a class="nohref">x</a><img class="pic" src="">"#),
    )
    .await;

    let mut builder = RuleTree::builder();
    let detail = builder.page(PageRule::new().field("heading", "h1"));
    let tree = builder
        .build(
            PageRule::new()
                .field("next", Rule::selector("a.nohref").attr("href").rules(detail))
                .field(
                    "pic",
                    Rule::selector("img.pic").attr("src").download(DownloadSpec::new()),
                ),
        )
        .unwrap();

    let result = crawl(&mock_server.uri(), tree, test_options())
        .await
        .expect("Crawl failed");

    assert_eq!(
        result["next"].error(),
        Some("request url(\"null\") failed: is not a valid URL")
    );
    assert_eq!(
        result["pic"].error(),
        Some("download url(\"\") failed: is not a valid URL")
    );
}

#[tokio::test]
async fn test_reference_never_set() {
    let mock_server = MockServer::start().await;
    mount(&mock_server, "/", html("<li>a</li><li>b</li>")).await;

    let tree = RuleTree::builder()
        .build(
            PageRule::new()
                .field("items", Rule::list("li"))
                .field("fifth", WaitFor::one("./items[5]", |_| Rule::selector("li"))),
        )
        .unwrap();

    let result = crawl(&mock_server.uri(), tree, test_options())
        .await
        .expect("Crawl failed");

    let items: Vec<Option<&str>> = result["items"]
        .as_list()
        .expect("Expected a list")
        .iter()
        .map(Node::as_str)
        .collect();
    assert_eq!(items, vec![Some("a"), Some("b")]);
    assert_eq!(
        result["fifth"].error(),
        Some("reference variable for path `items[5]` never get")
    );
}

#[tokio::test]
async fn test_hidden_fields() {
    let mock_server = MockServer::start().await;
    mount(&mock_server, "/", html(r#"<title>T</title><b id="token">42</b>"#)).await;

    let tree = RuleTree::builder()
        .build(
            PageRule::new()
                .field("token", Rule::selector("#token").hide())
                .field(
                    "title",
                    WaitFor::one("./token", |token: Value| {
                        Rule::selector("title").convert(move |title, _| {
                            json!(format!(
                                "{}#{}",
                                title.as_str().unwrap_or(""),
                                token.as_str().unwrap_or("")
                            ))
                        })
                    }),
                ),
        )
        .unwrap();

    let result = crawl(&mock_server.uri(), tree, test_options())
        .await
        .expect("Crawl failed");

    assert!(result.is_hidden("token"));
    assert_eq!(result["token"].as_str(), Some("42"));
    assert_eq!(result.to_json(), json!({ "title": "T#42" }));
}

#[tokio::test]
async fn test_data_list_scopes() {
    let mock_server = MockServer::start().await;
    mount(
        &mock_server,
        "/",
        html(
            r#"<ul>
              <li class="item"><span class="name">Tea</span><span class="price">3</span></li>
              <li class="item"><span class="name">Cake</span><span class="price">5</span></li>
              <li class="item"><span class="name">Skip</span></li>
            </ul>"#,
        ),
    )
    .await;

    let mut builder = RuleTree::builder();
    let item = builder.page(
        PageRule::new().field("name", ".name").field(
            "price",
            Rule::selector(".price").convert(|value, _| {
                value
                    .as_str()
                    .and_then(|s| s.parse::<u64>().ok())
                    .map(Value::from)
                    .unwrap_or(Value::Null)
            }),
        ),
    );
    let tree = builder
        .build(PageRule::new().field("items", Rule::list("li.item").max(2).data(item)))
        .unwrap();

    let result = crawl(&mock_server.uri(), tree, test_options())
        .await
        .expect("Crawl failed");

    assert_eq!(
        result.to_json(),
        json!({
            "items": [
                { "name": "Tea", "price": 3 },
                { "name": "Cake", "price": 5 }
            ]
        })
    );
}

#[tokio::test]
async fn test_download_list() {
    let mock_server = MockServer::start().await;
    mount(
        &mock_server,
        "/",
        html(r#"<img src="/a.gif"><img src="/b.gif"><img src="/missing.gif">"#),
    )
    .await;
    for name in ["/a.gif", "/b.gif"] {
        mount(
            &mock_server,
            name,
            ResponseTemplate::new(200).set_body_raw(name.as_bytes().to_vec(), "image/gif"),
        )
        .await;
    }
    mount(&mock_server, "/missing.gif", ResponseTemplate::new(404)).await;

    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let dir_path = dir.path().to_str().expect("Temp dir is not UTF-8").to_string();

    let tree = RuleTree::builder()
        .build(
            PageRule::new()
                .field(
                    "pics",
                    Rule::list("img")
                        .attr("src")
                        .concurrent(1)
                        .download(DownloadSpec::new().path(&dir_path).filename("img-{{index}}")),
                )
                .field(
                    "count",
                    WaitFor::one("./pics", |pics: Value| {
                        let saved = pics
                            .as_array()
                            .map(|all| all.iter().filter(|p| p.get("SAVED_PATH").is_some()).count())
                            .unwrap_or(0);
                        Rule::selector("img").convert(move |_, _| json!(saved))
                    }),
                ),
        )
        .unwrap();

    let result = crawl(&mock_server.uri(), tree, test_options())
        .await
        .expect("Crawl failed");

    let pics = result["pics"].as_list().expect("Expected a list");
    assert_eq!(pics.len(), 3);
    for (i, name) in ["/a.gif", "/b.gif"].iter().enumerate() {
        let saved = dir.path().join(format!("img-{}.gif", i));
        assert_eq!(pics[i].saved_path(), Some(saved.to_str().unwrap()));
        assert_eq!(std::fs::read(&saved).unwrap(), name.as_bytes());
    }
    assert!(pics[2].is_error());
    assert_eq!(result["count"].as_value(), Some(&json!(2)));
}

#[tokio::test]
async fn test_templated_selectors_and_attr() {
    let mock_server = MockServer::start().await;
    mount(
        &mock_server,
        "/",
        html(
            r#"<b id="key">B</b><span id="attr">data-code</span>
            <p class="A">wrong</p><p class="B">right</p>
            <i data-code="X"></i>
            <ul class="A"><li>no</li></ul><ul class="B"><li>1</li><li>2</li></ul>"#,
        ),
    )
    .await;

    let tree = RuleTree::builder()
        .build(
            PageRule::new()
                .field("key", "#key")
                .field("attr", "#attr")
                .field("para", Rule::selector("p.{{./key}}"))
                .field("code", Rule::selector("i").attr("{{./attr}}"))
                .field("items", Rule::list("ul.{{./key}} li")),
        )
        .unwrap();

    let result = crawl(&mock_server.uri(), tree, test_options())
        .await
        .expect("Crawl failed");

    assert_eq!(result["para"].as_str(), Some("right"));
    assert_eq!(result["code"].as_str(), Some("X"));
    assert_eq!(result.to_json()["items"], json!(["1", "2"]));
}

#[tokio::test]
async fn test_group_shares_one_rate_limited_queue() {
    let mock_server = MockServer::start().await;
    mount(
        &mock_server,
        "/",
        html(r#"<img class="a" src="/1.gif"><img class="b" src="/2.gif"><img class="b" src="/3.gif">"#),
    )
    .await;
    for name in ["/1.gif", "/2.gif", "/3.gif"] {
        mount(
            &mock_server,
            name,
            ResponseTemplate::new(200).set_body_raw(name.as_bytes().to_vec(), "image/gif"),
        )
        .await;
    }

    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let dir_path = dir.path().to_str().expect("Temp dir is not UTF-8").to_string();

    let mut builder = RuleTree::builder();
    let images = builder.group(Group::new().rate(150));
    let tree = builder
        .build(
            PageRule::new()
                .field(
                    "a",
                    Rule::selector("img.a")
                        .attr("src")
                        .download(DownloadSpec::new().path(&dir_path).filename("a"))
                        .group(images),
                )
                .field(
                    "b",
                    Rule::list("img.b")
                        .attr("src")
                        .download(DownloadSpec::new().path(&dir_path).filename("b-{{index}}"))
                        .group(images),
                )
                .field(
                    "b_count",
                    WaitFor::one("./b", |b: Value| {
                        let count = b.as_array().map(Vec::len).unwrap_or(0);
                        Rule::selector("img.a").convert(move |_, _| json!(count))
                    }),
                ),
        )
        .unwrap();

    let started = std::time::Instant::now();
    let result = crawl(&mock_server.uri(), tree, test_options())
        .await
        .expect("Crawl failed");
    let elapsed = started.elapsed();

    // Three downloads on one queue start at least 150ms apart
    assert!(
        elapsed >= std::time::Duration::from_millis(300),
        "group downloads finished after {:?}",
        elapsed
    );
    assert_eq!(
        result["a"].saved_path(),
        Some(dir.path().join("a.gif").to_str().unwrap())
    );
    let b = result["b"].as_list().expect("Expected a list");
    assert_eq!(b.len(), 2);
    for (i, saved) in b.iter().enumerate() {
        let expected = dir.path().join(format!("b-{}.gif", i));
        assert_eq!(saved.saved_path(), Some(expected.to_str().unwrap()));
    }
    assert_eq!(result["b_count"].as_value(), Some(&json!(2)));
}

#[tokio::test]
async fn test_entry_errors_are_fatal() {
    let mock_server = MockServer::start().await;
    mount(&mock_server, "/missing", ResponseTemplate::new(404)).await;
    mount(
        &mock_server,
        "/image",
        ResponseTemplate::new(200).set_body_raw(vec![0u8], "image/png"),
    )
    .await;

    let tree = || {
        RuleTree::builder()
            .build(PageRule::new().field("title", "title"))
            .unwrap()
    };

    let url = format!("{}/missing", mock_server.uri());
    let err = crawl(&url, tree(), test_options()).await.unwrap_err();
    assert_eq!(err.to_string(), format!("request url({}) failed: Not Found", url));

    let url = format!("{}/image", mock_server.uri());
    let err = crawl(&url, tree(), test_options()).await.unwrap_err();
    assert!(matches!(err, CrawlError::NotHtml { ref content_type, .. } if content_type == "image/png"));

    let err = crawl("ftp://example.com/", tree(), test_options()).await.unwrap_err();
    assert!(matches!(err, CrawlError::InvalidEntryUrl(_)));
}

#[tokio::test]
async fn test_rule_file_crawl() {
    let mock_server = MockServer::start().await;
    mount(
        &mock_server,
        "/",
        html(r#"<title>Blog</title><a class="post" href="/p/1">1</a><a class="post" href="/p/2">2</a>"#),
    )
    .await;
    mount(&mock_server, "/p/1", html("<h1>First</h1>")).await;
    mount(&mock_server, "/p/2", html("<h1>Second</h1>")).await;

    let rules = parse_rule_file(
        r#"
[options]
mode = "bf"
retry = 0
poll-interval = 10

[groups.posts]
concurrent = 1

[pages.root]
title = "title"
posts = { list = "a.post", attr = "href", rules = "post", group = "posts" }

[pages.post]
heading = "h1"
"#,
    )
    .expect("Failed to parse rules");
    assert_eq!(rules.options.mode, Mode::Bf);

    let result = crawl(&mock_server.uri(), rules.tree, rules.options)
        .await
        .expect("Crawl failed");

    assert_eq!(
        result.to_json(),
        json!({
            "title": "Blog",
            "posts": [{ "heading": "First" }, { "heading": "Second" }]
        })
    );
}

/// Paths requested by a three-level crawl with one global slot
///
/// `/b` is slow, so while it runs both `/c` (a root link) and `/a2` (found
/// on `/a`) are waiting in the global queue; the mode decides which is next.
async fn request_order(mode: Mode) -> Vec<String> {
    let mock_server = MockServer::start().await;
    mount(
        &mock_server,
        "/",
        html(r#"<a href="/a">a</a><a href="/b">b</a><a href="/c">c</a>"#),
    )
    .await;
    for name in ["a", "b", "c"] {
        mount(
            &mock_server,
            &format!("/{}", name),
            html(&format!(r#"<a href="/{}2">next</a>"#, name))
                .set_delay(std::time::Duration::from_millis(100)),
        )
        .await;
        mount(&mock_server, &format!("/{}2", name), html("<h1>end</h1>")).await;
    }

    let mut builder = RuleTree::builder();
    let leaf = builder.page(PageRule::new().field("heading", "h1"));
    let mid = builder.page(PageRule::new().field("next", Rule::selector("a").attr("href").rules(leaf)));
    let tree = builder
        .build(PageRule::new().field("links", Rule::list("a").attr("href").rules(mid)))
        .unwrap();

    let options = CrawlOptions {
        mode,
        total_concurrent: 1,
        ..test_options()
    };
    crawl(&mock_server.uri(), tree, options)
        .await
        .expect("Crawl failed");

    mock_server
        .received_requests()
        .await
        .expect("Request recording is enabled")
        .iter()
        .map(|request| request.url.path().to_string())
        .collect()
}

#[tokio::test]
async fn test_breadth_first_order() {
    let order = request_order(Mode::Bf).await;
    assert_eq!(order, vec!["/", "/a", "/b", "/c", "/a2", "/b2", "/c2"]);
}

#[tokio::test]
async fn test_depth_first_order() {
    let order = request_order(Mode::Df).await;
    assert_eq!(&order[..4], &["/", "/a", "/b", "/a2"]);
    assert_eq!(order.len(), 7);
}
