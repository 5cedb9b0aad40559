/// Join url or path segments with exactly one slash between them.
///
/// A trailing slash is only kept if the last segment has one.
pub fn join_with_slash(base: &str, segments: &[&str]) -> String {
    let mut parts = vec![base.trim_end_matches('/')];
    parts.extend(segments.iter().map(|s| s.trim_matches('/')));
    let mut out = parts.join("/");
    if segments.last().map_or(false, |s| s.ends_with('/')) {
        out.push('/');
    }
    out
}
