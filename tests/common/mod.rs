#![allow(dead_code)]

/// Builds syntactically valid PDF files with a classical cross-reference
/// table, computing real byte offsets for every object.
pub struct PdfBuilder {
    objects: Vec<(u32, Vec<u8>)>,
    trailer_extra: String,
}

impl PdfBuilder {
    pub fn new() -> Self {
        PdfBuilder {
            objects: Vec::new(),
            trailer_extra: String::new(),
        }
    }

    pub fn object(mut self, num: u32, body: impl AsRef<str>) -> Self {
        self.objects.push((num, body.as_ref().as_bytes().to_vec()));
        self
    }

    /// Adds a stream object; `dict_extra` lands in the dictionary next to
    /// the computed /Length.
    pub fn stream_object(mut self, num: u32, dict_extra: &str, payload: &[u8]) -> Self {
        let mut body = format!("<< /Length {} {} >>\nstream\n", payload.len(), dict_extra)
            .into_bytes();
        body.extend_from_slice(payload);
        body.extend_from_slice(b"\nendstream");
        self.objects.push((num, body));
        self
    }

    /// Extra entries for the trailer dictionary, e.g. `/Encrypt 9 0 R`.
    pub fn trailer_extra(mut self, extra: &str) -> Self {
        self.trailer_extra = extra.to_string();
        self
    }

    pub fn build(self, root: u32) -> Vec<u8> {
        let mut data = b"%PDF-1.7\n".to_vec();

        let max_num = self.objects.iter().map(|(num, _)| *num).max().unwrap_or(0);
        let mut offsets = vec![None; max_num as usize + 1];
        for (num, body) in &self.objects {
            offsets[*num as usize] = Some(data.len());
            data.extend_from_slice(format!("{} 0 obj\n", num).as_bytes());
            data.extend_from_slice(body);
            data.extend_from_slice(b"\nendobj\n");
        }

        let xref_offset = data.len();
        data.extend_from_slice(format!("xref\n0 {}\n", max_num + 1).as_bytes());
        data.extend_from_slice(b"0000000000 65535 f \n");
        for offset in offsets.iter().skip(1) {
            match offset {
                Some(offset) => {
                    data.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
                }
                None => data.extend_from_slice(b"0000000000 65535 f \n"),
            }
        }

        data.extend_from_slice(
            format!(
                "trailer\n<< /Size {} /Root {} 0 R {} >>\n",
                max_num + 1,
                root,
                self.trailer_extra
            )
            .as_bytes(),
        );
        data.extend_from_slice(format!("startxref\n{}\n%%EOF\n", xref_offset).as_bytes());
        data
    }
}

/// Catalog + single-page tree skeleton most tests start from.
pub fn minimal_builder() -> PdfBuilder {
    PdfBuilder::new()
        .object(1, "<< /Type /Catalog /Pages 2 0 R >>")
        .object(2, "<< /Type /Pages /Kids [3 0 R] /Count 1 >>")
        .object(3, "<< /Type /Page /Parent 2 0 R >>")
}
