fn main() {
    println!("Run `cargo test -p end-to-end` to execute the upload/download round trip tests.");
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use asyncoss_checksum::crc64;
    use asyncoss_crypto::{
        AesCtrCipher, CEK_ALG_AES_CTR, CipherTransform, CryptoError, CryptoProvider,
        MaterialDescription, adjust_range, random_key_iv,
    };
    use asyncoss_http::headers::OSS_HASH_CRC64_ECMA;
    use asyncoss_http::{
        ContentCryptoMaterial, GetObjectOptions, GetObjectResult, Request, Session, check_crc,
    };
    use asyncoss_transfer::{ByteSource, ChunkAdapter, ProgressSink};
    use reqwest::Method;
    use reqwest::header::{HeaderMap, HeaderValue, RANGE};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    const MASTER: u8 = 0x5A;
    const TIMEOUT: Duration = Duration::from_secs(5);

    fn wrap(data: &[u8]) -> Vec<u8> {
        data.iter().map(|b| b ^ MASTER).collect()
    }

    /// Wraps content keys by XOR with a single master byte.
    struct XorProvider {
        mat_desc: MaterialDescription,
    }

    impl CryptoProvider for XorProvider {
        fn mat_desc(&self) -> &MaterialDescription {
            &self.mat_desc
        }

        fn wrap_alg(&self) -> &str {
            "xor"
        }

        fn decrypt_encrypted_key(&self, encrypted_key: &[u8]) -> Result<Vec<u8>, CryptoError> {
            Ok(wrap(encrypted_key))
        }

        fn decrypt_encrypted_iv(&self, encrypted_iv: &[u8]) -> Result<Vec<u8>, CryptoError> {
            Ok(wrap(encrypted_iv))
        }

        fn materials_for(&self, _: &MaterialDescription) -> Option<Arc<dyn CryptoProvider>> {
            None
        }
    }

    /// In-memory object store speaking just enough HTTP/1.1 for one object.
    struct Stored {
        meta: Vec<(String, String)>,
        body: Vec<u8>,
    }

    async fn read_request(stream: &mut TcpStream) -> (String, Vec<u8>) {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        let head_end = loop {
            let n = stream.read(&mut chunk).await.unwrap();
            assert!(n > 0);
            buf.extend_from_slice(&chunk[..n]);
            if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                break pos + 4;
            }
        };
        let head = String::from_utf8_lossy(&buf[..head_end]).into_owned();
        let body_len = head
            .lines()
            .find_map(|l| l.to_lowercase().strip_prefix("content-length:").map(str::to_string))
            .map(|v| v.trim().parse::<usize>().unwrap())
            .unwrap_or(0);
        while buf.len() < head_end + body_len {
            let n = stream.read(&mut chunk).await.unwrap();
            assert!(n > 0);
            buf.extend_from_slice(&chunk[..n]);
        }
        (head, buf[head_end..].to_vec())
    }

    fn header<'a>(head: &'a str, name: &str) -> Option<&'a str> {
        head.lines().find_map(|line| {
            let (n, v) = line.split_once(':')?;
            n.eq_ignore_ascii_case(name).then(|| v.trim())
        })
    }

    async fn handle(stream: &mut TcpStream, store: &Mutex<Option<Stored>>) {
        let (head, body) = read_request(stream).await;
        let mut response = Vec::new();

        if head.starts_with("PUT ") {
            let meta = head
                .lines()
                .filter_map(|line| line.split_once(':'))
                .filter(|(n, _)| n.to_lowercase().starts_with("x-oss-meta-"))
                .map(|(n, v)| (n.to_lowercase(), v.trim().to_string()))
                .collect();
            let crc = crc64(&body);
            *store.lock().unwrap() = Some(Stored { meta, body });
            response.extend_from_slice(
                format!(
                    "HTTP/1.1 200 OK\r\nx-oss-request-id: put-1\r\n{OSS_HASH_CRC64_ECMA}: {crc}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
                )
                .as_bytes(),
            );
        } else {
            let guard = store.lock().unwrap();
            let stored = guard.as_ref().unwrap();
            let total = stored.body.len();
            let (status, range, slice) = match header(&head, "range")
                .and_then(|r| r.strip_prefix("bytes="))
                .and_then(|r| r.split_once('-'))
            {
                Some((a, b)) => {
                    let (a, b): (usize, usize) = (a.parse().unwrap(), b.parse().unwrap());
                    (
                        "206 Partial Content",
                        Some(format!("Content-Range: bytes {a}-{b}/{total}\r\n")),
                        &stored.body[a..=b],
                    )
                }
                None => ("200 OK", None, &stored.body[..]),
            };

            let mut head_out = format!("HTTP/1.1 {status}\r\nx-oss-request-id: get-1\r\n");
            if range.is_none() {
                head_out.push_str(&format!(
                    "{OSS_HASH_CRC64_ECMA}: {}\r\n",
                    crc64(&stored.body)
                ));
            }
            for (n, v) in &stored.meta {
                head_out.push_str(&format!("{n}: {v}\r\n"));
            }
            head_out.push_str(&range.unwrap_or_default());
            head_out.push_str(&format!(
                "Content-Length: {}\r\nConnection: close\r\n\r\n",
                slice.len()
            ));
            response.extend_from_slice(head_out.as_bytes());
            response.extend_from_slice(slice);
        }

        stream.write_all(&response).await.unwrap();
        stream.shutdown().await.unwrap();
    }

    async fn object_store(connections: usize) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/bucket/object", listener.local_addr().unwrap());
        tokio::spawn(async move {
            let store = Mutex::new(None);
            for _ in 0..connections {
                let (mut stream, _) = listener.accept().await.unwrap();
                handle(&mut stream, &store).await;
            }
        });
        url
    }

    fn provider() -> Arc<XorProvider> {
        Arc::new(XorProvider {
            mat_desc: [("env".to_string(), "test".to_string())].into(),
        })
    }

    #[tokio::test]
    async fn encrypted_upload_then_verified_download() {
        let plain: Vec<u8> = (0..50_000u32).map(|i| (i % 251) as u8).collect();
        let url = object_store(3).await;
        let session = Session::default();

        // Upload: encrypt while reading the body, store wrapped materials.
        let (key, iv) = random_key_iv();
        let material = ContentCryptoMaterial {
            encrypted_key: wrap(&key),
            encrypted_iv: wrap(&iv),
            cek_alg: CEK_ALG_AES_CTR.to_string(),
            wrap_alg: "xor".to_string(),
            mat_desc: provider().mat_desc().clone(),
        };
        let mut headers = HeaderMap::new();
        material.to_headers(&mut headers).unwrap();

        let sent = Arc::new(Mutex::new(0u64));
        let s = Arc::clone(&sent);
        let body = ChunkAdapter::builder(ByteSource::buffer(plain.clone()))
            .progress(ProgressSink::new(move |done, _| *s.lock().unwrap() = done))
            .cipher(Box::new(AesCtrCipher::new(&key, &iv, 0).unwrap()))
            .build()
            .unwrap();
        let req = Request::new(Method::PUT, &url, headers, "e2e")
            .unwrap()
            .with_adapter(body);
        let put = session.do_request(req, TIMEOUT).await.unwrap();
        assert_eq!(put.request_id(), "put-1");
        assert_eq!(*sent.lock().unwrap(), plain.len() as u64);

        let mut expected_cipher = plain.clone();
        AesCtrCipher::new(&key, &iv, 0)
            .unwrap()
            .apply(&mut expected_cipher);
        let server_crc = put
            .header(OSS_HASH_CRC64_ECMA)
            .and_then(|v| v.parse().ok());
        check_crc("put object", Some(crc64(&expected_cipher)), server_crc, put.request_id())
            .unwrap();

        // Full download: decrypt and check CRC against the stored ciphertext.
        let req = Request::new(Method::GET, &url, HeaderMap::new(), "e2e").unwrap();
        let resp = session.do_request(req, TIMEOUT).await.unwrap();
        let mut result = GetObjectResult::new(
            resp,
            GetObjectOptions {
                crc_enabled: true,
                crypto_provider: Some(provider()),
                ..Default::default()
            },
        )
        .unwrap();
        assert!(result.is_encrypted());

        let mut downloaded = Vec::new();
        while let Some(chunk) = result.next_chunk().await.unwrap() {
            downloaded.extend_from_slice(&chunk);
        }
        assert_eq!(downloaded, plain);
        result.verify_crc().unwrap();
        result.close();

        // Ranged download starting mid-block.
        let (want_start, want_end) = (1_000u64, 2_345u64);
        let (start, end) = adjust_range(want_start, want_end);
        let mut headers = HeaderMap::new();
        headers.insert(
            RANGE,
            HeaderValue::from_str(&format!("bytes={start}-{end}")).unwrap(),
        );
        let req = Request::new(Method::GET, &url, headers, "e2e").unwrap();
        let resp = session.do_request(req, TIMEOUT).await.unwrap();
        assert_eq!(resp.status(), 206);

        let mut result = GetObjectResult::new(
            resp,
            GetObjectOptions {
                crypto_provider: Some(provider()),
                discard: want_start - start,
                ..Default::default()
            },
        )
        .unwrap();
        let ranged = result.read(None).await.unwrap();
        assert_eq!(&ranged[..], &plain[want_start as usize..=want_end as usize]);
        assert!(result.read(None).await.unwrap().is_empty());
    }
}
