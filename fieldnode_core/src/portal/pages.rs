//! Built-in page fragments, placeholder rendering and the chunked page writer

use super::http::ResponseSink;

pub const MASKED_PASSWORD: &str = "********";

const HEAD_START: &str = "<!DOCTYPE html><html lang='en'><head><meta charset='utf-8'>\
<meta name='viewport' content='width=device-width,initial-scale=1,user-scalable=no'/>\
<title>{title}</title>";
const HEAD_STYLE: &str = "<style>body{font-family:verdana;text-align:center}\
div,input{padding:5px;font-size:1em;width:95%}\
button{border:0;border-radius:0.3rem;background:#1fa3ec;color:#fff;line-height:2.4rem;\
font-size:1.2rem;width:100%}</style>";
const HEAD_END: &str = "</head><body><div style='text-align:left;display:inline-block;min-width:260px;'>";
const PAGE_END: &str = "</div></body></html>";

pub const BUTTON: &str = "<a href='{uri}'><button>{name}</button></a><hr>";
pub const ROOT_SETTINGS: &str = "<a href='/settings'><button>Settings</button></a>";
pub const ROOT_STATUS: &str = "<hr><a href='/status'><button>Status</button></a>";

pub const SETTINGS_FORM_START: &str = "<form method='POST' action='saveSettings'>";
pub const SETTINGS_NODE_NAME: &str = "<b>Node Name</b> <i><small>(required. lowercase letters, numbers, and _ only)</small></i>\
<input id='nodeName' required name='nodeName' maxlength=31 placeholder='Node Name' pattern='[a-z0-9_]*' value='{nodeName}'>";
pub const SETTINGS_WIFI_SSID: &str = "<br/><br/><b>WiFi SSID</b> <i><small>(required)</small></i>\
<input id='wifiSsid' required name='wifiSsid' maxlength=32 placeholder='WiFi SSID' value='{wifiSsid}'>";
pub const SETTINGS_WIFI_PASSWD: &str = "<br/><b>WiFi Password</b> <i><small>(optional)</small></i>\
<input id='wifiPass' name='wifiPass' type='password' maxlength=64 placeholder='WiFi Password' value='{wifiPass}'>";
pub const SETTINGS_ADMIN_USER: &str = "<br/><br/><b>Admin Username</b> <i><small>(optional)</small></i>\
<input id='configUser' name='configUser' maxlength=31 placeholder='Admin User' value='{configUser}'>";
pub const SETTINGS_ADMIN_PASSWD: &str = "<br/><b>Admin Password</b> <i><small>(optional)</small></i>\
<input id='configPassword' name='configPassword' type='password' maxlength=31 placeholder='Admin User Password' value='{configPassword}'>";
pub const SETTINGS_BUS_SERVER: &str = "<br/><br/><b>MQTT Broker</b> <i><small>(required)</small></i>\
<input id='mqttServer' required name='mqttServer' maxlength=63 placeholder='mqttServer' value='{mqttServer}'>";
pub const SETTINGS_BUS_PORT: &str = "<br/><b>MQTT Port</b> <i><small>(required)</small></i>\
<input id='mqttPort' required name='mqttPort' type='number' maxlength=5 placeholder='1883' value='{mqttPort}'>";
pub const SETTINGS_BUS_USER: &str = "<br/><b>MQTT User</b> <i><small>(optional)</small></i>\
<input id='mqttUser' name='mqttUser' maxlength=31 placeholder='mqttUser' value='{mqttUser}'>";
pub const SETTINGS_BUS_PASSWD: &str = "<br/><b>MQTT Password</b> <i><small>(optional)</small></i>\
<input id='mqttPassword' name='mqttPassword' type='password' maxlength=31 placeholder='mqttPassword' value='{mqttPassword}'>";
pub const SETTINGS_BUS_TOPIC: &str = "<br/><b>MQTT Topic</b> <i><small>(optional)</small></i>\
<input id='mqttTopic' name='mqttTopic' maxlength=127 value='{mqttTopic}'>";
pub const SETTINGS_BUS_STATUS: &str = "<br/><b>MQTT Status</b>\
<input id='mqttStatus' readonly name='mqttStatus' placeholder='mqttStatus' value='{mqttStatus}'>";
pub const SETTINGS_DEBUG_LOCAL: &str = "<br/><br/><b>Debug Serial Enabled</b> <i><small>(0/1)</small></i>\
<input id='debugSerialEnabled' name='debugSerialEnabled' type='number' min='0' max='1' value='{debugSerialEnabled}'>";
pub const SETTINGS_DEBUG_REMOTE: &str = "<br/><b>Debug Remote Enabled</b> <i><small>(0/1)</small></i>\
<input id='debugRemoteEnabled' name='debugRemoteEnabled' type='number' min='0' max='1' value='{debugRemoteEnabled}'>";
pub const SETTINGS_SAVE_FORM_END: &str = "<br/><br/><button type='submit'>Save</button></form>";
pub const BACK_BUTTON: &str = "<hr><a href='/'><button>Back</button></a>";

pub const REDIRECT_15_SEC: &str = "<meta http-equiv='refresh' content='15;url={redirectUrl}' />";
pub const REDIRECT_3_SEC: &str = "<meta http-equiv='refresh' content='3;url={redirectUrl}' />";
pub const SAVE_RESTART: &str = "<br/>Saving updated configuration values and restarting device ... <a href='{redirectUrl}'>redirect</a>";
pub const SAVE_NO_CHANGE: &str = "<br/>No changes found ... redirecting to <a href='{redirectUrl}'>settings</a>";

pub const STATUS_FW_NAME: &str = "<b>FW Name: </b> {firmwareName}";
pub const STATUS_FW_VERSION: &str = "<br/><b>FW Version: </b> {firmwareVersion}";
pub const STATUS_FW_FORM: &str = "<form method='POST' action='/updateFw' enctype='multipart/form-data'> <hr> \
<b>FW Upload: </b> <input type='file' accept='.bin,.bin.gz' name='firmware'> <button>Update Firmware</button> </form> <hr>";
pub const STATUS_CPU: &str = "<br/><b>CPU Frequency: </b> {cpuFreq} MHz";
pub const STATUS_SKETCH_SIZE: &str = "<br/><b>Sketch Size: </b> {sketchSize} bytes";
pub const STATUS_SKETCH_FREE: &str = "<br/><b>Free Sketch Space: </b> {freeSketchSize} bytes";
pub const STATUS_HEAP: &str = "<br/><b>Heap Free: </b> {freeHeap}";
pub const STATUS_IP_ADDR: &str = "<br/><b>IP Address: </b> {ipAddr}";
pub const STATUS_SIGNAL: &str = "<br/><b>Signal Strength: </b> {sigStrength}";
pub const STATUS_UPTIME: &str = "<br/><b>Uptime: </b> {uptime} sec";

pub const FIRMWARE_OK: &str = "<br/>Firmware update written, restarting device ... <a href='{redirectUrl}'>redirect</a>";
pub const FIRMWARE_FAILED: &str = "<br/>Firmware update failed: {error}";

/// Replace every `{key}` in `template` with its value
///
/// One left-to-right pass: substituted values are never scanned again, and
/// placeholders without a value are kept verbatim.
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];

        let Some(close) = after.find(&['{', '}'][..]) else {
            out.push_str(&rest[open..]);
            return out;
        };

        if after.as_bytes()[close] == b'{' {
            // stray brace, restart from the next one
            out.push('{');
            out.push_str(&after[..close]);
            rest = &after[close..];
            continue;
        }

        let key = &after[..close];
        match vars.iter().find(|(name, _)| *name == key) {
            Some((_, value)) => out.push_str(value),
            None => {
                out.push('{');
                out.push_str(key);
                out.push('}');
            }
        }
        rest = &after[close + 1..];
    }

    out.push_str(rest);
    out
}

/// Escape text for HTML bodies and quoted attributes
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\'' => out.push_str("&#39;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

/// Streams one logical HTML page as chunks
///
/// `start` sends the head and the common `<h1>` header, `content` appends
/// body chunks and `finish` closes the page with the end chunk followed by an
/// empty terminating chunk.
pub struct PageWriter<'a> {
    sink: &'a mut dyn ResponseSink,
    title: &'a str,
    started: bool,
    finished: bool,
}

impl<'a> PageWriter<'a> {
    /// `title` is shown as the page title and the `<h1>` header
    pub fn new(sink: &'a mut dyn ResponseSink, title: &'a str) -> Self {
        Self {
            sink,
            title,
            started: false,
            finished: false,
        }
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Begin a page; an empty `page_type` omits the `<h2>` header
    pub fn start(&mut self, status: u16, page_type: &str) {
        self.start_with_meta(status, page_type, None, "/");
    }

    /// Begin a page with an extra `<meta>` fragment; `{redirectUrl}` in it
    /// is replaced with `redirect_url`
    pub fn start_with_meta(
        &mut self,
        status: u16,
        page_type: &str,
        meta: Option<&str>,
        redirect_url: &str,
    ) {
        if self.started {
            return;
        }
        self.started = true;

        self.sink.begin(status, "text/html", &[]);
        self.sink.chunk(&render(HEAD_START, &[("title", self.title)]));
        self.sink.chunk(HEAD_STYLE);
        if let Some(meta) = meta.filter(|m| !m.is_empty()) {
            self.sink.chunk(&render(meta, &[("redirectUrl", redirect_url)]));
        }
        self.sink.chunk(HEAD_END);

        self.sink.chunk(&format!("<h1>{}</h1>", escape_html(self.title)));
        if !page_type.is_empty() {
            self.sink.chunk(&format!("<h2>{}</h2>", escape_html(page_type)));
        }
    }

    /// Body chunk, sent as is
    pub fn content(&mut self, content: &str) {
        if !self.started {
            self.start(200, "");
        }
        if !content.is_empty() {
            self.sink.chunk(content);
        }
    }

    /// Body chunk rendered from `template`
    pub fn content_with(&mut self, template: &str, vars: &[(&str, &str)]) {
        self.content(&render(template, vars));
    }

    pub fn finish(&mut self) {
        if self.finished {
            return;
        }
        if !self.started {
            self.start(200, "");
        }
        self.finished = true;
        self.sink.chunk(PAGE_END);
        self.sink.chunk("");
        self.sink.end();
    }

    /// Answer with headers only, no content
    pub fn empty(&mut self, status: u16, headers: &[(String, String)]) {
        if self.started {
            return;
        }
        self.started = true;
        self.finished = true;
        self.sink.begin(status, "text/html", headers);
        self.sink.end();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::sim::RecordedResponse;

    #[test]
    fn test_render_substitutes_once() {
        let out = render(
            "<a href='{uri}'>{name}</a>",
            &[("uri", "/relay"), ("name", "{uri}")],
        );
        assert_eq!(out, "<a href='/relay'>{uri}</a>");
    }

    #[test]
    fn test_render_keeps_unknown_and_stray_braces() {
        assert_eq!(render("{missing} ok", &[]), "{missing} ok");
        assert_eq!(render("a { b {x}", &[("x", "1")]), "a { b 1");
        assert_eq!(render("tail {", &[]), "tail {");
        assert_eq!(render("}{x}}", &[("x", "y")]), "}y}");
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(escape_html("a'b<c>&\""), "a&#39;b&lt;c&gt;&amp;&quot;");
    }

    #[test]
    fn test_page_chunks() {
        let response = RecordedResponse::new();
        let mut sink = response.clone();
        let mut page = PageWriter::new(&mut sink, "relay_01");

        page.start(200, "Status");
        page.content("<p>hi</p>");
        page.finish();
        page.finish();

        let chunks = response.chunks();
        assert_eq!(response.status(), Some(200));
        assert_eq!(response.content_type(), "text/html");
        assert!(chunks[0].contains("<title>relay_01</title>"));
        assert!(chunks.contains(&"<h1>relay_01</h1>".to_string()));
        assert!(chunks.contains(&"<h2>Status</h2>".to_string()));
        assert_eq!(chunks[chunks.len() - 2], PAGE_END);
        assert_eq!(chunks[chunks.len() - 1], "");
        assert!(response.is_ended());
    }

    #[test]
    fn test_redirect_meta() {
        let response = RecordedResponse::new();
        let mut sink = response.clone();
        let mut page = PageWriter::new(&mut sink, "relay_01");

        page.start_with_meta(200, "", Some(REDIRECT_3_SEC), "/settings");
        page.finish();

        assert!(response
            .body()
            .contains("<meta http-equiv='refresh' content='3;url=/settings' />"));
        assert!(!response.body().contains("<h2>"));
    }
}
