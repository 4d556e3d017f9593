// src/host/scheme.rs
//! Scheme returned for `--scheme`. The host reads it once and caches it, so
//! changes here need a host restart to take effect.

pub const SCHEME: &str = r#"<scheme>
    <title>Socrata Data Feed</title>
    <description>Retrieve events from a Socrata-run government data site</description>
    <use_external_validation>false</use_external_validation>
    <use_single_instance>false</use_single_instance>
    <streaming_mode>xml</streaming_mode>
    <endpoint>
        <args>
            <arg name="url">
                <title>url</title>
                <description>The Socrata SODA API resource URL</description>
                <data_type>string</data_type>
                <required_on_create>true</required_on_create>
            </arg>
            <arg name="date_field">
                <title>date_field</title>
                <description>Date field to sort on (and index by)</description>
                <data_type>string</data_type>
                <required_on_create>true</required_on_create>
            </arg>
            <arg name="default_checkpoint_date">
                <title>default_checkpoint_date</title>
                <description>Earliest date to index (in isoformat, like 2016-01-01)</description>
                <data_type>string</data_type>
                <required_on_create>true</required_on_create>
            </arg>
            <arg name="limit">
                <title>limit</title>
                <description>Number of events to pull per request</description>
                <data_type>number</data_type>
                <required_on_create>false</required_on_create>
            </arg>
        </args>
    </endpoint>
</scheme>
"#;
