use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use tldw::backends::{OpenAiConfig, OpenAiGenerator, OpenAiTranscriber};
use tldw::error::{CaptionError, TransientKind};
use tldw::source::audio::{AudioChunk, AudioPayload};
use tldw::source::captions::{CaptionProvider, HttpCaptions};
use tldw::source::transcribe::Transcriber;
use tldw::{BackendError, Generator, VideoInfo};

/// Accept connections on an ephemeral port and answer each with the next canned response.
/// `None` accepts the connection and never answers.
async fn serve(responses: Vec<Option<String>>) -> anyhow::Result<String> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    tokio::spawn(async move {
        for response in responses {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                let mut buf = vec![0_u8; 64 * 1024];
                let mut seen = Vec::new();
                while !request_complete(&seen) {
                    match stream.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => seen.extend_from_slice(&buf[..n]),
                    }
                }
                match response {
                    Some(response) => {
                        let _ = stream.write_all(response.as_bytes()).await;
                        let _ = stream.shutdown().await;
                    }
                    None => tokio::time::sleep(Duration::from_secs(30)).await,
                }
            });
        }
    });

    Ok(format!("http://{addr}"))
}

/// Headers received and, when announced, the whole body (sized or chunked).
fn request_complete(seen: &[u8]) -> bool {
    let Some(end) = seen.windows(4).position(|w| w == b"\r\n\r\n") else {
        return false;
    };
    let head = String::from_utf8_lossy(&seen[..end]).to_ascii_lowercase();
    let body = &seen[end + 4..];
    if head.contains("transfer-encoding: chunked") {
        return body.ends_with(b"0\r\n\r\n");
    }
    let length = head
        .lines()
        .find_map(|line| line.strip_prefix("content-length:"))
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(0);
    body.len() >= length
}

fn http(status: &str, headers: &[(&str, &str)], body: &str) -> Option<String> {
    let mut out = format!(
        "HTTP/1.1 {status}\r\nContent-Length: {}\r\nConnection: close\r\n",
        body.len()
    );
    for (name, value) in headers {
        out.push_str(&format!("{name}: {value}\r\n"));
    }
    out.push_str("\r\n");
    out.push_str(body);
    Some(out)
}

fn video_with_track(url: &str) -> VideoInfo {
    serde_json::from_value(serde_json::json!({
        "id": "abc",
        "automatic_captions": {
            "en": [{ "ext": "vtt", "url": "ignored" }, { "ext": "json3", "url": url }]
        }
    }))
    .expect("valid info")
}

#[tokio::test]
async fn downloads_and_parses_json3_captions() -> anyhow::Result<()> {
    let body = r#"{"events":[{"tStartMs":0,"dDurationMs":1500,"segs":[{"utf8":"hello"}]},{"tStartMs":2000,"dDurationMs":500,"segs":[{"utf8":"again"}]}]}"#;
    let base = serve(vec![http("200 OK", &[("Content-Type", "application/json")], body)]).await?;

    let captions = HttpCaptions::new(Duration::from_secs(5))
        .fetch(&video_with_track(&format!("{base}/captions")))
        .await?;

    assert_eq!(captions.language, "en");
    let texts: Vec<&str> = captions.segments.iter().map(|s| s.text.as_str()).collect();
    assert_eq!(texts, vec!["hello", "again"]);
    assert_eq!(captions.segments[1].start, 2.0);
    Ok(())
}

#[tokio::test]
async fn caption_failures_are_categorized() -> anyhow::Result<()> {
    let cases = [
        (http("403 Forbidden", &[], "blocked"), "http_status"),
        (http("200 OK", &[], ""), "empty_body"),
        (http("200 OK", &[("Content-Type", "text/html")], "<html>consent</html>"), "malformed"),
        (http("200 OK", &[], r#"{"wireMagic":"pb3"}"#), "malformed"),
    ];
    for (response, expected) in cases {
        let base = serve(vec![response]).await?;
        let err = HttpCaptions::new(Duration::from_secs(5))
            .fetch(&video_with_track(&format!("{base}/captions")))
            .await
            .expect_err("caption fetch should fail");
        assert_eq!(err.category(), expected, "{err}");
    }
    Ok(())
}

#[tokio::test]
async fn slow_caption_server_times_out() -> anyhow::Result<()> {
    let base = serve(vec![None]).await?;
    let err = HttpCaptions::new(Duration::from_millis(200))
        .fetch(&video_with_track(&format!("{base}/captions")))
        .await
        .expect_err("should time out");
    assert!(matches!(err, CaptionError::Timeout), "{err}");
    Ok(())
}

#[tokio::test]
async fn missing_track_never_touches_the_network() {
    let info: VideoInfo = serde_json::from_str(r#"{"id":"abc"}"#).expect("valid info");
    let err = HttpCaptions::new(Duration::from_secs(1))
        .fetch(&info)
        .await
        .expect_err("no track");
    assert_eq!(err.category(), "no_track");
}

fn config(base: &str) -> OpenAiConfig {
    OpenAiConfig {
        base_url: format!("{base}/v1"),
        api_key: Some("test-key".to_owned()),
        model: "test-model".to_owned(),
    }
}

#[tokio::test]
async fn chat_completion_returns_content_and_counts_tokens() -> anyhow::Result<()> {
    let body = r#"{"choices":[{"message":{"role":"assistant","content":"a fine summary"}}],"usage":{"total_tokens":42}}"#;
    let base = serve(vec![http("200 OK", &[("Content-Type", "application/json")], body)]).await?;

    let generator = OpenAiGenerator::new(config(&base));
    assert_eq!(generator.complete("summarize this").await?, "a fine summary");
    assert_eq!(generator.tokens_used(), 42);
    Ok(())
}

#[tokio::test]
async fn chat_status_codes_map_to_the_backend_taxonomy() -> anyhow::Result<()> {
    let base = serve(vec![
        http("429 Too Many Requests", &[("Retry-After", "3")], "slow down"),
        http("503 Service Unavailable", &[], "busy"),
        http("401 Unauthorized", &[], "bad key"),
    ])
    .await?;
    let generator = OpenAiGenerator::new(config(&base));

    match generator.complete("p").await {
        Err(BackendError::Transient {
            kind: TransientKind::RateLimited,
            retry_after,
            ..
        }) => assert_eq!(retry_after, Some(Duration::from_secs(3))),
        other => panic!("expected rate limit, got {other:?}"),
    }

    let err = generator.complete("p").await.expect_err("503");
    assert!(err.is_transient());

    let err = generator.complete("p").await.expect_err("401");
    assert!(!err.is_transient());
    assert!(err.to_string().contains("bad key"));
    Ok(())
}

#[tokio::test]
async fn transcription_reads_verbose_json_segments() -> anyhow::Result<()> {
    let body = r#"{"text":"one two","segments":[{"id":0,"start":0.0,"end":1.2,"text":" one"},{"id":1,"start":1.2,"end":2.0,"text":" two"}]}"#;
    let base = serve(vec![http("200 OK", &[("Content-Type", "application/json")], body)]).await?;

    let transcriber = OpenAiTranscriber::new(config(&base));
    let chunk = AudioChunk {
        index: 0,
        offset: 0.0,
        payload: AudioPayload::Pcm16kMono(vec![0.0; 1600]),
    };
    let segments = transcriber.transcribe(&chunk).await?;
    let texts: Vec<&str> = segments.iter().map(|s| s.text.as_str()).collect();
    assert_eq!(texts, vec!["one", "two"]);
    assert_eq!(segments[1].start, 1.2);
    Ok(())
}
